//! # bt-swarm
//!
//! Downloads the file of a torrent from its swarm, or seeds it.
//!
//! ## Usage
//!
//! ```bash
//! bt-swarm <torrent_file>
//! bt-swarm <torrent_file> -o <output_file>
//! bt-swarm <torrent_file> -d <download_dir>
//! bt-swarm <torrent_file> --peer 10.0.0.2:6881 --peer 10.0.0.3:6881
//! bt-swarm <torrent_file> -o <existing_file> --seed --port 6881
//! ```
//!
//! Without `--peer`, the peers are requested from the torrent's first HTTP
//! tracker.

use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use bt_swarm::{
    conf::{Conf, DEFAULT_PORT},
    disk::SharedFile,
    metainfo::Metainfo,
    storage_info::StorageInfo,
    swarm::Swarm,
    tracker::tracker::Tracker,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Downloads or seeds a torrent over the BitTorrent peer wire protocol."
)]
struct Args {
    /// Path to the .torrent file
    torrent: PathBuf,

    /// Output file (defaults to the name from the torrent, in the download
    /// directory)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Directory the file is downloaded to when no output file is given
    #[arg(short = 'd', long, default_value = ".")]
    download_dir: PathBuf,

    /// Seed the output file instead of downloading it
    #[arg(long)]
    seed: bool,

    /// Peer to connect to, skipping the tracker (may be repeated)
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Port to announce and to listen on when seeding
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of pieces downloaded concurrently
    #[arg(long)]
    max_peers: Option<usize>,
}

/// Replaces path separators so that the torrent's name cannot point outside
/// the download directory.
fn sanitize_filename(filename: &str) -> String {
    let safe_name = filename.replace(['/', '\\'], "_");
    if safe_name.trim().is_empty() {
        "download".to_string()
    } else {
        safe_name
    }
}

/// The explicit output file, or the torrent's name in the download directory.
fn output_path(conf: &Conf, output: Option<PathBuf>, name: &str) -> PathBuf {
    output.unwrap_or_else(|| {
        conf.engine.download_dir.join(sanitize_filename(name))
    })
}

async fn run(args: Args) -> Result<()> {
    let raw = tokio::fs::read(&args.torrent).await.with_context(|| {
        format!("could not read torrent file {:?}", args.torrent)
    })?;
    let metainfo = Metainfo::from_bytes(&raw)?;
    log::info!("Loaded torrent {:?}", metainfo);

    let mut conf = Conf::new(args.download_dir);
    let output = output_path(&conf, args.output, &metainfo.name);
    conf.engine.listen_addr.set_port(args.port);
    if let Some(max_peers) = args.max_peers {
        conf.torrent.max_peers = max_peers;
    }

    let peers = if !args.peers.is_empty() || args.seed {
        args.peers
    } else {
        let url = metainfo
            .trackers
            .first()
            .ok_or_else(|| anyhow!("torrent has no HTTP tracker, use --peer"))?;
        let tracker = Tracker::new(url.clone());
        let data = tracker
            .get_peers_data(
                metainfo.info_hash,
                conf.engine.client_id,
                args.port,
                metainfo.file_size,
            )
            .await?;
        log::info!(
            "Tracker reports {:?} seeder(s), {:?} leecher(s)",
            data.seeders,
            data.leechers
        );
        data.peers
    };

    let storage = StorageInfo::new(&metainfo);
    let file = SharedFile::open(&output, storage).await?;
    let mut swarm = Swarm::new(metainfo, peers, &conf);
    swarm.add_shared_file_handler(Arc::new(file)).await;

    if args.seed {
        println!("Seeding {:?} on port {}", output, args.port);
        swarm.seed_file().await?;
        return Ok(());
    }

    swarm.handshakes().await;
    swarm.initialize_bitfields().await;
    swarm.download_file().await?;

    println!("{}", swarm.stats().await);
    println!("Saved in {:?}.", output);
    Ok(())
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init_timed();

    let args = Args::parse();
    if let Err(error) = run(args).await {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_is_placed_in_download_dir() {
        let conf = Conf::new("/tmp/downloads");
        assert_eq!(
            output_path(&conf, None, "../etc/passwd"),
            PathBuf::from("/tmp/downloads/.._etc_passwd")
        );
        assert_eq!(
            output_path(&conf, Some("out.bin".into()), "name"),
            PathBuf::from("out.bin")
        );
    }
}

use std::{fmt, time::Duration};

/// Transfer statistics of the whole swarm.
///
/// Rates are in KiB/s and measured per piece: the download rate is the size
/// of the last piece divided by the time it took to download it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SwarmStats {
    /// The number of pieces downloaded and validated.
    pub downloaded_pieces: usize,
    /// The piece bytes downloaded.
    pub downloaded_bytes: u64,
    /// The piece bytes uploaded to other peers.
    pub uploaded_bytes: u64,
    /// The rate of the last downloaded piece.
    pub download_rate: f64,
    /// The mean of the rates of all downloaded pieces.
    pub avg_download_rate: f64,
    /// The highest rate of a single piece.
    pub max_download_rate: f64,
    rate_sum: f64,
}

impl SwarmStats {
    /// Records a piece of `len` bytes that took `elapsed` to download.
    pub fn record_download(&mut self, len: usize, elapsed: Duration) {
        let kib = len as f64 / 1024.0;
        let secs = elapsed.as_secs_f64();
        self.download_rate = if secs > 0.0 { kib / secs } else { kib };

        self.downloaded_pieces += 1;
        self.downloaded_bytes += len as u64;
        self.rate_sum += self.download_rate;
        self.avg_download_rate = self.rate_sum / self.downloaded_pieces as f64;
        if self.download_rate > self.max_download_rate {
            self.max_download_rate = self.download_rate;
        }
    }

    pub fn record_upload(&mut self, bytes: u64) {
        self.uploaded_bytes += bytes;
    }
}

impl fmt::Display for SwarmStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "downloaded {} piece(s) ({} bytes) [rate: {:.2} KiB/s, \
            avg: {:.2} KiB/s, max: {:.2} KiB/s], uploaded {} bytes",
            self.downloaded_pieces,
            self.downloaded_bytes,
            self.download_rate,
            self.avg_download_rate,
            self.max_download_rate,
            self.uploaded_bytes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_track_current_average_and_max_rate() {
        let mut stats = SwarmStats::default();
        stats.record_download(2048, Duration::from_secs(1));
        stats.record_download(1024, Duration::from_secs(1));
        stats.record_download(4096, Duration::from_millis(500));

        assert_eq!(stats.downloaded_pieces, 3);
        assert_eq!(stats.downloaded_bytes, 7168);
        assert_eq!(stats.download_rate, 8.0);
        assert_eq!(stats.avg_download_rate, (2.0 + 1.0 + 8.0) / 3.0);
        assert_eq!(stats.max_download_rate, 8.0);

        stats.record_upload(100);
        stats.record_upload(24);
        assert_eq!(stats.uploaded_bytes, 124);
        assert!(stats.to_string().starts_with("downloaded 3 piece(s)"));
    }
}

use std::fmt;
use std::path::{Path, PathBuf};

use url::Url;

use crate::error::metainfo::{MetainfoError, Result};
use crate::{PieceIndex, Sha1Hash};

/// The meta info from torrent file.
///
/// Shared read-only by every part of the swarm, behind an `Arc`.
#[derive(Clone)]
pub struct Metainfo {
    /// torrent name, the form for download path.
    pub name: String,
    /// 20 bytes of SHA-1 of the bencoded info dictionary,
    /// identifies the torrent to peers and trackers.
    pub info_hash: Sha1Hash,
    /// contain the a concatenation of each piece's SHA-1,
    /// length is the multiple of 20 bytes.
    pub pieces: Vec<u8>,
    /// the nominal length of the pieces, all but the last one are this long.
    pub piece_len: usize,
    /// the length of the shared content. For a multi file torrent this is the
    /// sum of its files, downloaded as a single contiguous file.
    pub file_size: u64,
    /// The relative paths of the files, in torrent order.
    pub files: Vec<PathBuf>,
    /// The trackers that we can announce to.
    pub trackers: Vec<Url>,
}

impl fmt::Debug for Metainfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metainfo")
            .field("name", &self.name)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("pieces", &"<pieces...>")
            .field("piece_len", &self.piece_len)
            .field("file_size", &self.file_size)
            .field("files", &self.files)
            .finish()
    }
}

impl Metainfo {
    /// Parse from a byte buffer to crate a [`Metainfo`] instance
    /// or return a Error about the invalid format, syntax or which come from `serde_bencode`
    ///
    /// Here are some rules:
    /// - the bencode format and syntax should correct.
    /// - the length of pieces in info should be the multiple of 20.
    /// - cannot not contain both `length` (single file) and `files` (multi files).
    /// - lengths must not be 0.
    /// - the number of pieces must cover exactly the content length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let metainfo: raw::Metainfo = serde_bencode::from_bytes(bytes)?;

        // the pieces field is a concatenation of 20 byte SHA-1 hashes, so it
        // must be a multiple of 20
        if metainfo.info.pieces.len() % 20 != 0 {
            return Err(MetainfoError::InvalidPieces);
        }
        if metainfo.info.piece_len == 0 {
            log::warn!("Piece length is 0");
            return Err(MetainfoError::InvalidMetainfo);
        }

        let mut files = Vec::new();
        let file_size = if let Some(len) = metainfo.info.len {
            if metainfo.info.files.is_some() {
                log::warn!("Metainfo cannot contain both `length` and `files`");
                return Err(MetainfoError::InvalidMetainfo);
            }
            if len == 0 {
                log::warn!("File length is 0");
                return Err(MetainfoError::InvalidMetainfo);
            }
            files.push(PathBuf::from(&metainfo.info.name));
            len
        } else if let Some(raw_files) = &metainfo.info.files {
            if raw_files.is_empty() {
                log::warn!("Metainfo files must not be empty");
                return Err(MetainfoError::InvalidMetainfo);
            }

            let mut total = 0;
            for file in raw_files.iter() {
                if file.len == 0 {
                    log::warn!("File {:?} length is 0", file.path);
                    return Err(MetainfoError::InvalidMetainfo);
                }

                let path: PathBuf = file.path.iter().collect();
                if path.as_os_str().is_empty()
                    || path.is_absolute()
                    || path == Path::new("/")
                {
                    log::warn!("Path {:?} is not a valid relative path", path);
                    return Err(MetainfoError::InvalidMetainfo);
                }

                files.push(path);
                total += file.len;
            }
            total
        } else {
            log::warn!("No `length` or `files` key present in metainfo");
            return Err(MetainfoError::InvalidMetainfo);
        };

        let piece_count = metainfo.info.pieces.len() / 20;
        let expected_count = (file_size as usize + metainfo.info.piece_len
            - 1)
            / metainfo.info.piece_len;
        if piece_count != expected_count {
            log::warn!(
                "Metainfo has {} pieces, content needs {}",
                piece_count,
                expected_count
            );
            return Err(MetainfoError::InvalidPieces);
        }

        let mut trackers = Vec::new();
        let announces = if !metainfo.announce_list.is_empty() {
            metainfo.announce_list.iter().flatten().collect::<Vec<_>>()
        } else {
            metainfo.announce.iter().collect()
        };
        for tracker in announces {
            let url = Url::parse(tracker)?;
            // UDP trackers are not supported
            if url.scheme() == "http" || url.scheme() == "https" {
                trackers.push(url);
            }
        }
        if trackers.is_empty() {
            log::warn!("No HTTP trackers in metainfo");
        }

        let info_hash = metainfo.create_info_hash()?;

        Ok(Metainfo {
            name: metainfo.info.name,
            info_hash,
            pieces: metainfo.info.pieces,
            piece_len: metainfo.info.piece_len,
            file_size,
            files,
            trackers,
        })
    }

    /// The number of pieces the content is split into.
    pub fn piece_count(&self) -> usize {
        self.pieces.len() / 20
    }

    /// Returns the expected SHA-1 hash of the piece, if the index is valid.
    pub fn piece_hash(&self, index: PieceIndex) -> Option<&[u8]> {
        self.pieces.get(index * 20..(index + 1) * 20)
    }

    /// Return true if the download multi files
    pub fn is_archive(&self) -> bool {
        self.files.len() > 1
    }
}

mod raw {
    //! Only for `bencode` crate deserialize to
    //! convert into [`super::Metainfo`].
    use serde_derive::{Deserialize, Serialize};

    use super::*;

    /// Details field meaning in [.torrent file](https://en.wikipedia.org/wiki/Torrent_file)
    #[derive(Debug, Deserialize)]
    pub struct Metainfo {
        /// this maps to a dictionary whose keys are dependent on whether one or more files are being shared
        pub info: Info,
        /// the URL of the tracker
        pub announce: Option<String>,
        #[serde(default)]
        #[serde(rename = "announce-list")]
        pub announce_list: Vec<Vec<String>>,
    }

    impl Metainfo {
        pub fn create_info_hash(&self) -> Result<Sha1Hash> {
            let info = serde_bencode::to_bytes(&self.info)?;
            Ok(crate::sha1_hash(&info))
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct Info {
        /// suggested filename where the file is to be saved (if one file)/suggested directory name
        /// where the files are to be saved (if multiple files)
        pub name: String,
        #[serde(with = "serde_bytes")]
        /// a hash list, i.e., a concatenation of each piece's SHA-1 hash.
        pub pieces: Vec<u8>,
        #[serde(rename = "piece length")]
        /// number of bytes per piece.
        pub piece_len: usize,
        #[serde(rename = "length")]
        #[serde(skip_serializing_if = "Option::is_none")]
        /// size of the file in bytes (only when one file is being shared though)
        pub len: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        /// a list of dictionaries each corresponding to a file (only when multiple files are being shared)
        pub files: Option<Vec<File>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        /// not used but kept to encode back a valid info hash.
        pub private: Option<u8>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    pub struct File {
        /// a list of strings corresponding to subdirectory names, the last of which is the actual file name
        pub path: Vec<String>,
        #[serde(rename = "length")]
        /// size of the file in bytes
        pub len: u64,
    }
}

/// Builds the metainfo of a single file torrent sharing `data`.
#[cfg(test)]
pub(crate) fn for_content(data: &[u8], piece_len: usize) -> Metainfo {
    let pieces = data
        .chunks(piece_len)
        .flat_map(crate::sha1_hash)
        .collect();
    Metainfo {
        name: "content.bin".into(),
        info_hash: crate::sha1_hash(b"content.bin"),
        pieces,
        piece_len,
        file_size: data.len() as u64,
        files: vec!["content.bin".into()],
        trackers: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(info: &str, announce: &str) -> Vec<u8> {
        format!("d8:announce{}:{}4:info{}e", announce.len(), announce, info)
            .into_bytes()
    }

    fn single_file_info(len: u64, piece_len: usize, pieces: usize) -> String {
        let hashes = "a".repeat(20 * pieces);
        format!(
            "d6:lengthi{}e4:name8:file.bin12:piece lengthi{}e6:pieces{}:{}e",
            len,
            piece_len,
            hashes.len(),
            hashes
        )
    }

    #[test]
    fn should_parse_single_file_torrent() {
        let bytes = encode(
            &single_file_info(40000, 16384, 3),
            "http://tracker.example/announce",
        );
        let metainfo = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(metainfo.name, "file.bin");
        assert_eq!(metainfo.file_size, 40000);
        assert_eq!(metainfo.piece_len, 16384);
        assert_eq!(metainfo.piece_count(), 3);
        assert_eq!(metainfo.piece_hash(2), Some(&[b'a'; 20][..]));
        assert_eq!(metainfo.piece_hash(3), None);
        assert_eq!(metainfo.trackers.len(), 1);
        assert!(!metainfo.is_archive());
    }

    #[test]
    fn info_hash_is_sha1_of_bencoded_info() {
        let info = single_file_info(10, 16384, 1);
        let bytes = encode(&info, "http://t/a");
        let metainfo = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(metainfo.info_hash, crate::sha1_hash(info.as_bytes()));
    }

    #[test]
    fn should_reject_piece_count_mismatch() {
        let bytes = encode(&single_file_info(40000, 16384, 2), "http://t/a");
        assert!(matches!(
            Metainfo::from_bytes(&bytes),
            Err(MetainfoError::InvalidPieces)
        ));
    }

    #[test]
    fn should_skip_udp_trackers() {
        let bytes =
            encode(&single_file_info(10, 16384, 1), "udp://tracker.example:80");
        let metainfo = Metainfo::from_bytes(&bytes).unwrap();
        assert!(metainfo.trackers.is_empty());
    }
}

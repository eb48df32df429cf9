//! Torrent layout and piece addressing ([BEP-3], [BEP-47], [BEP-52]).
//!
//! A torrent's content is a sequence of files cut into pieces. How piece
//! indices map onto file bytes depends on the torrent's version:
//!
//! - v1 torrents concatenate all files into one stream ([`TorrentLayout::Legacy`])
//! - v2 torrents start every file on a piece boundary ([`TorrentLayout::Modern`])
//! - hybrid torrents pad files so both views agree ([`TorrentLayout::Hybrid`])
//!
//! [`TorrentInfo`] places a list of [`FileSpec`]s under a download directory
//! and answers every piece/offset question for the storage layer. All
//! functions here are pure: no state, no I/O.
//!
//! # Examples
//!
//! ```
//! use rbit_disk::metainfo::{FileSpec, TorrentInfo, TorrentLayout};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let info = TorrentInfo::new(
//!     TorrentLayout::Modern,
//!     8,
//!     "./downloads",
//!     vec![FileSpec::new("a.bin", 10), FileSpec::new("b.bin", 5)],
//! )?;
//!
//! assert_eq!(info.piece_count(), 3);
//! assert_eq!(info.bytes_in_piece(1)?, 2);
//! assert_eq!(info.piece_to_offset(2)?, 10);
//! assert_eq!(info.offset_to_piece(12)?, 2);
//! # Ok(())
//! # }
//! ```
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html
//! [BEP-47]: http://bittorrent.org/beps/bep_0047.html
//! [BEP-52]: http://bittorrent.org/beps/bep_0052.html

mod error;
mod layout;

pub use error::LayoutError;
pub use layout::{FileSpan, FileSpec, TorrentFile, TorrentInfo, TorrentLayout};

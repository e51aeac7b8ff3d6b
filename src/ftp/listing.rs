//! Directory listing payloads.
//!
//! Each entry is a type letter followed by a name, separated by NUL or
//! newline: `D` directory, `F` file with `\t<size>`, `S` skipped entry.

/// Kind of a listed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtpEntryKind {
    Directory,
    File { size: u64 },
}

/// One entry of a remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEntry {
    pub name: String,
    pub kind: FtpEntryKind,
    /// Full remote path
    pub path: String,
}

impl FtpEntry {
    pub fn is_directory(&self) -> bool {
        self.kind == FtpEntryKind::Directory
    }

    /// Size of a file; `None` for directories
    pub fn size(&self) -> Option<u64> {
        match self.kind {
            FtpEntryKind::File { size } => Some(size),
            FtpEntryKind::Directory => None,
        }
    }
}

/// Result of parsing one listing response
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Listing {
    pub entries: Vec<FtpEntry>,

    /// Entries the remote counted, including skipped ones; the next request
    /// offset advances by this much
    pub raw_count: u32,
}

/// Parse one listing payload relative to the listed directory
///
/// # Examples
///
/// ```
/// use mav_link_core::ftp::listing::parse_listing;
///
/// let listing = parse_listing("/APM", b"Dsubdir\0Ffile.txt\t1024\0Sskipped\0");
/// assert_eq!(listing.entries.len(), 2);
/// assert_eq!(listing.entries[1].path, "/APM/file.txt");
/// assert_eq!(listing.raw_count, 3);
/// ```
pub fn parse_listing(base: &str, data: &[u8]) -> Listing {
    let mut listing = Listing::default();

    for raw in data.split(|&b| b == 0 || b == b'\n') {
        let Some((&kind, rest)) = raw.split_first() else {
            continue;
        };
        listing.raw_count += 1;

        let rest = String::from_utf8_lossy(rest);
        let entry = match kind {
            b'D' => {
                let name = rest.trim_end_matches('\r');
                if name == "." || name == ".." {
                    continue;
                }
                (name.to_string(), FtpEntryKind::Directory)
            }
            b'F' => {
                let (name, size) = match rest.split_once('\t') {
                    Some((name, size)) => (name, size.trim().parse().unwrap_or(0)),
                    None => (&*rest, 0),
                };
                (name.to_string(), FtpEntryKind::File { size })
            }
            // S and anything unrecognised
            _ => continue,
        };

        let (name, kind) = entry;
        if name.is_empty() {
            continue;
        }
        listing.entries.push(FtpEntry {
            path: join_path(base, &name),
            name,
            kind,
        });
    }

    listing
}

fn join_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    format!("{}/{}", base, name)
}

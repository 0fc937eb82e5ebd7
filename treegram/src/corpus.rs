//! Treebank file access.
//!
//! A treebank is a plain text file carrying one bracketed tree per line.
//! Blank lines and lines whose first non-space character is `#` are
//! skipped without comment.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use treegram_core::{ModelError, Tree};

/// Line-oriented reader over a treebank file.
///
/// Iteration yields `(line_number, parse_result)` for every candidate
/// line, leaving the malformed-tree policy to the caller.
pub struct Treebank {
    reader: BufReader<File>,
    path: PathBuf,
    line: usize,
}

impl Treebank {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Treebank {
            reader: BufReader::new(file),
            path,
            line: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for Treebank {
    type Item = (usize, Result<Tree, ModelError>);

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = String::new();
        loop {
            buf.clear();
            match self.reader.read_line(&mut buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    self.line += 1;
                    return Some((self.line, Err(ModelError::Io(e))));
                }
            }
            self.line += 1;
            let text = buf.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            return Some((self.line, Tree::parse(text)));
        }
    }
}

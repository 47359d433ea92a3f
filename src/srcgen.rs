//! Indentation-aware source code formatter, used by the output-artifact
//! writers (declaration file, dispatch table, audit files).

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

const SHIFT_WIDTH: usize = 4;

pub struct Formatter {
    indent: usize,
    lines: Vec<String>,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new()
    }
}

impl Formatter {
    pub fn new() -> Self {
        Self {
            indent: 0,
            lines: Vec::new(),
        }
    }

    pub fn indent_push(&mut self) {
        self.indent += 1;
    }

    pub fn indent_pop(&mut self) {
        assert!(self.indent > 0, "already at top level indentation");
        self.indent -= 1;
    }

    pub fn indent<T>(&mut self, f: impl FnOnce(&mut Formatter) -> T) -> T {
        self.indent_push();
        let ret = f(self);
        self.indent_pop();
        ret
    }

    fn get_indent(&self) -> String {
        " ".repeat(self.indent * SHIFT_WIDTH)
    }

    /// Add an indented line, splitting embedded newlines into separate
    /// lines so each gets the current indentation.
    pub fn line(&mut self, content: impl AsRef<str>) {
        let indent = self.get_indent();
        for l in content.as_ref().split('\n') {
            if l.is_empty() {
                self.lines.push(String::new());
            } else {
                self.lines.push(format!("{indent}{l}"));
            }
        }
    }

    pub fn empty_line(&mut self) {
        self.lines.push(String::new());
    }

    pub fn comment(&mut self, s: impl AsRef<str>) {
        self.line(format!("// {}", s.as_ref()));
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }

    /// Write the buffered lines to `path`, via a transactional scratch
    /// file: write to `path.tmp`, then rename into place. Partial output
    /// is never observable at `path` (spec §7 propagation policy).
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        write_atomically(path, self.render().as_bytes())
    }
}

/// Write `contents` to `path` by first writing a sibling `.tmp` file and
/// renaming it into place, so a crash or fatal error mid-write never
/// leaves a half-written output artifact where a caller might read it.
pub fn write_atomically(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });
    {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indentation_tracks_pushes_and_pops() {
        let mut fmt = Formatter::new();
        fmt.line("top");
        fmt.indent(|fmt| {
            fmt.line("nested");
            fmt.indent(|fmt| {
                fmt.line("deeper");
            });
        });
        fmt.line("back");
        assert_eq!(fmt.render(), "top\n    nested\n        deeper\nback\n");
    }

    #[test]
    fn write_atomically_leaves_no_tmp_file() {
        let dir = std::env::temp_dir().join(format!("stencilc-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.txt");
        write_atomically(&path, b"hello").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "hello");
        assert!(!path.with_extension("txt.tmp").exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}

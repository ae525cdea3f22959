/// Splits raw console output into lines.
///
/// Prompts such as `raspberrypi login: ` are not newline terminated, so the
/// boot driver flushes a pending partial line once the console goes quiet.
/// When the rest of that line arrives later, only the unseen remainder is
/// emitted.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
    flushed: usize,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends output and returns every completed line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let skip = std::mem::take(&mut self.flushed).min(line.len());
            let rest = decode(&line[skip..]);
            if skip == 0 || !rest.is_empty() {
                lines.push(rest);
            }
        }
        lines
    }

    /// The not yet emitted part of the current line, if it has content.
    pub fn flush_partial(&mut self) -> Option<String> {
        if self.flushed >= self.buffer.len() {
            return None;
        }
        let partial = decode(&self.buffer[self.flushed..]);
        self.flushed = self.buffer.len();
        if partial.trim().is_empty() {
            None
        } else {
            Some(partial)
        }
    }

    /// Drains whatever is left at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.flush_partial();
        self.buffer.clear();
        self.flushed = 0;
        rest
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_lines_across_chunks() {
        let mut lines = LineAssembler::new();
        assert!(lines.push(b"Booting Li").is_empty());
        assert_eq!(lines.push(b"nux\r\n[ OK ] Started\nrest"), vec!["Booting Linux", "[ OK ] Started"]);
        assert_eq!(lines.finish().as_deref(), Some("rest"));
    }

    #[test]
    fn test_flushed_prompt_is_not_repeated() {
        let mut lines = LineAssembler::new();
        assert!(lines.push(b"raspberrypi login: ").is_empty());
        assert_eq!(lines.flush_partial().as_deref(), Some("raspberrypi login: "));
        assert_eq!(lines.flush_partial(), None);
        assert_eq!(lines.push(b"pi\r\n"), vec!["pi"]);
        assert_eq!(lines.push(b"Password: "), Vec::<String>::new());
        assert_eq!(lines.flush_partial().as_deref(), Some("Password: "));
        assert!(lines.push(b"\r\n").is_empty());
    }

    #[test]
    fn test_multibyte_split_between_chunks() {
        let mut lines = LineAssembler::new();
        let text = "ümlaut\n".as_bytes();
        assert!(lines.push(&text[..1]).is_empty());
        assert_eq!(lines.push(&text[1..]), vec!["ümlaut"]);
    }

    #[test]
    fn test_empty_lines_are_kept() {
        let mut lines = LineAssembler::new();
        assert_eq!(lines.push(b"a\n\nb\n"), vec!["a", "", "b"]);
    }
}

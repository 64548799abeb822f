//! Streaming redaction of secret values.
//!
//! [`MaskWriter`] sits between a producer (process output, echoed command lines)
//! and a sink. Every sensitive value found inside a single `write` call is
//! replaced by [`MASK`] before the bytes reach the sink.
//!
//! Redaction is per write call: a value split across two writes is forwarded
//! unmasked. The process runner forwards whole lines, so this only matters for
//! secrets that contain a newline.

use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::Mutex;

use regex::bytes::{NoExpand, Regex, RegexBuilder};

/// Fixed replacement token. Its length does not depend on the secret length.
pub const MASK: &str = "***";

/// Writer that masks sensitive values and keeps a copy of everything it forwarded.
///
/// `&MaskWriter` also implements [`Write`], so one instance can be shared by two
/// concurrent producers. Each chunk is masked, forwarded and buffered under a
/// single lock.
#[derive(Debug)]
pub struct MaskWriter<W> {
    values: Vec<String>,
    pattern: Option<Regex>,
    state: Mutex<MaskState<W>>,
}

#[derive(Debug)]
struct MaskState<W> {
    writer: W,
    buffer: Vec<u8>,
}

impl<W: Write> MaskWriter<W> {
    /// Wrap `writer`, masking every non-empty value in `sensitive`.
    pub fn new<I, S>(writer: W, sensitive: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values = unique_sensitive_values(sensitive);
        Self {
            pattern: sensitive_pattern(&values),
            values,
            state: Mutex::new(MaskState {
                writer,
                buffer: Vec::new(),
            }),
        }
    }

    /// Copy of all bytes forwarded so far (already masked).
    pub fn buffered(&self) -> Vec<u8> {
        match self.state.lock() {
            Ok(state) => state.buffer.clone(),
            Err(poisoned) => poisoned.into_inner().buffer.clone(),
        }
    }

    /// Consume the writer, returning the sink and the forwarded bytes.
    pub fn into_parts(self) -> (W, Vec<u8>) {
        let state = match self.state.into_inner() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        (state.writer, state.buffer)
    }

    /// Apply the mask to `chunk` without writing it anywhere.
    pub fn mask<'a>(&self, chunk: &'a [u8]) -> Cow<'a, [u8]> {
        if let Some(pattern) = &self.pattern {
            return pattern.replace_all(chunk, NoExpand(MASK.as_bytes()));
        }
        if self.values.is_empty() {
            return Cow::Borrowed(chunk);
        }
        let mut masked = chunk.to_vec();
        for value in &self.values {
            masked = replace_literal(&masked, value.as_bytes(), MASK.as_bytes());
        }
        Cow::Owned(masked)
    }

    fn write_masked(&self, chunk: &[u8]) -> io::Result<usize> {
        let masked = self.mask(chunk);
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("mask writer lock poisoned"))?;
        state.writer.write_all(&masked)?;
        state.buffer.extend_from_slice(&masked);
        Ok(chunk.len())
    }

    fn flush_inner(&self) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| io::Error::other("mask writer lock poisoned"))?;
        state.writer.flush()
    }
}

impl<W: Write> Write for MaskWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_masked(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_inner()
    }
}

impl<W: Write> Write for &MaskWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_masked(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_inner()
    }
}

/// Unique, non-empty values sorted longest first.
///
/// The regex alternation is leftmost-first, so longer values win over values
/// they contain and the result does not depend on input order.
pub fn unique_sensitive_values<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut unique: Vec<String> = values
        .into_iter()
        .map(|value| value.as_ref().to_string())
        .filter(|value| !value.is_empty())
        .collect();
    unique.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    unique.dedup();
    unique
}

fn sensitive_pattern(values: &[String]) -> Option<Regex> {
    if values.is_empty() {
        return None;
    }
    let alternation = values
        .iter()
        .map(|value| regex::escape(value))
        .collect::<Vec<_>>()
        .join("|");
    // Escaped literals always compile; only the size limits could reject them.
    RegexBuilder::new(&alternation)
        .size_limit(usize::MAX)
        .dfa_size_limit(usize::MAX)
        .build()
        .map_err(|err| tracing::warn!(err = %err, "sensitive pattern rejected, using literal search"))
        .ok()
}

fn replace_literal(chunk: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chunk.len());
    let mut rest = chunk;
    while let Some(pos) = rest.windows(needle.len()).position(|window| window == needle) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(replacement);
        rest = &rest[pos + needle.len()..];
    }
    out.extend_from_slice(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn masked(original: &str, sensitive: &[&str]) -> String {
        let mut writer = MaskWriter::new(Vec::new(), sensitive.iter().copied());
        writer.write_all(original.as_bytes()).expect("write");
        let (sink, _) = writer.into_parts();
        String::from_utf8(sink).expect("utf8")
    }

    #[test]
    fn masks_sensitive_info() {
        let got = masked(
            "sensitive=password123 and another TEST_API=s3cr3t",
            &["password123", "s3cr3t"],
        );
        assert_eq!(got, "sensitive=*** and another TEST_API=***");
    }

    #[test]
    fn mask_count_matches_occurrences() {
        let got = masked("abc-abc-xabcx-abc", &["abc"]);
        assert!(!got.contains("abc"));
        assert_eq!(got.matches(MASK).count(), 4);
        assert_eq!(got, "***-***-x***x-***");
    }

    #[test]
    fn mask_length_does_not_depend_on_secret_length() {
        assert_eq!(masked("[a]", &["a"]), "[***]");
        assert_eq!(
            masked("[averyveryverylongsecretvalue]", &["averyveryverylongsecretvalue"]),
            "[***]"
        );
    }

    #[test]
    fn empty_values_are_ignored() {
        assert_eq!(masked("nothing to hide", &["", ""]), "nothing to hide");
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert_eq!(masked("p=a.b*c and axbbc", &["a.b*c"]), "p=*** and axbbc");
    }

    #[test]
    fn overlapping_values_mask_independent_of_order() {
        let a = masked("token=secret-extended", &["secret", "secret-extended"]);
        let b = masked("token=secret-extended", &["secret-extended", "secret"]);
        assert_eq!(a, "token=***");
        assert_eq!(a, b);
    }

    #[test]
    fn write_reports_original_length() {
        let mut writer = MaskWriter::new(Vec::new(), ["longsecretvalue"]);
        let n = writer.write(b"x=longsecretvalue").expect("write");
        assert_eq!(n, "x=longsecretvalue".len());
        assert_eq!(writer.buffered(), b"x=***".to_vec());
    }

    #[test]
    fn buffer_retains_masked_output() {
        let mut writer = MaskWriter::new(Vec::new(), ["hunter2"]);
        writer.write_all(b"one hunter2\n").expect("write");
        writer.write_all(b"two\n").expect("write");
        assert_eq!(writer.buffered(), b"one ***\ntwo\n".to_vec());
        let (sink, buffer) = writer.into_parts();
        assert_eq!(sink, buffer);
    }

    /// Documents the per-write limitation: a secret split across two writes
    /// reaches the sink unmasked.
    #[test]
    fn secret_split_across_writes_is_not_masked() {
        let mut writer = MaskWriter::new(Vec::new(), ["password123"]);
        writer.write_all(b"sensitive=passw").expect("write");
        writer.write_all(b"ord123\n").expect("write");
        let (sink, _) = writer.into_parts();
        let got = String::from_utf8(sink).expect("utf8");
        assert!(got.contains("passw"));
        assert!(got.contains("ord123"));
        assert!(!got.contains(MASK));
    }

    #[test]
    fn shared_writer_does_not_interleave_chunks() {
        let writer = MaskWriter::new(Vec::new(), ["s3cr3t"]);
        let a_line = format!("{}s3cr3t\n", "a".repeat(256));
        let b_line = format!("{}s3cr3t\n", "b".repeat(256));

        thread::scope(|scope| {
            for line in [&a_line, &b_line] {
                let mut shared = &writer;
                scope.spawn(move || {
                    for _ in 0..200 {
                        shared.write_all(line.as_bytes()).expect("write");
                    }
                });
            }
        });

        let (sink, _) = writer.into_parts();
        let got = String::from_utf8(sink).expect("utf8");
        let lines: Vec<&str> = got.lines().collect();
        assert_eq!(lines.len(), 400);
        for line in lines {
            let body = line.strip_suffix(MASK).expect("masked suffix");
            assert!(
                body.chars().all(|c| c == 'a') || body.chars().all(|c| c == 'b'),
                "interleaved line: {line}"
            );
        }
    }

    #[test]
    fn unique_values_sorted_longest_first() {
        let values = unique_sensitive_values(["b", "", "ccc", "b", "aa"]);
        assert_eq!(values, vec!["ccc", "aa", "b"]);
    }
}

//! Streaming `multipart/form-data` framing.
//!
//! Unlike `reqwest::multipart`, parts are written straight into any
//! [`std::io::Write`] as they are produced, so the body never has to exist in
//! memory as a whole.

use std::io::{self, Write};

pub struct MultipartWriter<W: Write> {
    inner: W,
    boundary: String,
    parts: usize,
}

impl<W: Write> MultipartWriter<W> {
    pub fn with_boundary(inner: W, boundary: impl Into<String>) -> Self {
        Self {
            inner,
            boundary: boundary.into(),
            parts: 0,
        }
    }

    /// Starts a new file part and returns the writer for its body. The part
    /// ends when the next one starts or the form is finished.
    pub fn file_part(&mut self, name: &str, filename: &str) -> io::Result<&mut W> {
        if self.parts > 0 {
            self.inner.write_all(b"\r\n")?;
        }
        write!(
            self.inner,
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            self.boundary,
            escape_quotes(name),
            escape_quotes(filename),
        )?;
        self.parts += 1;
        Ok(&mut self.inner)
    }

    /// Writes the closing delimiter and hands back the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        if self.parts > 0 {
            self.inner.write_all(b"\r\n")?;
        }
        write!(self.inner, "--{}--\r\n", self.boundary)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

pub fn random_boundary() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn escape_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_framed_in_order() {
        let mut form = MultipartWriter::with_boundary(Vec::new(), "XYZ");
        form.file_part("request", "request.json")
            .unwrap()
            .write_all(b"{}")
            .unwrap();
        form.file_part("codex", "main.ipynb")
            .unwrap()
            .write_all(b"nb")
            .unwrap();
        let body = String::from_utf8(form.finish().unwrap()).unwrap();

        let expected = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"request\"; filename=\"request.json\"\r\n\
            Content-Type: application/octet-stream\r\n\r\n\
            {}\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"codex\"; filename=\"main.ipynb\"\r\n\
            Content-Type: application/octet-stream\r\n\r\n\
            nb\r\n\
            --XYZ--\r\n";
        assert_eq!(body, expected);
    }

    #[test]
    fn filenames_are_escaped() {
        let mut form = MultipartWriter::with_boundary(Vec::new(), "b");
        form.file_part("codex", "we\"ird\\name.ipynb").unwrap();
        let body = String::from_utf8(form.finish().unwrap()).unwrap();
        assert!(body.contains("filename=\"we\\\"ird\\\\name.ipynb\""));
    }

    #[test]
    fn random_boundaries_differ() {
        let a = random_boundary();
        let b = random_boundary();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

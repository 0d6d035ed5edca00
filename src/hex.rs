// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Length-capped hex dumps for log lines and error messages.
//!
//! Video datagrams are up to a couple kilobytes and frames tens of kilobytes;
//! dumping them whole would drown the log.

use pretty_hex::PrettyHex;

pub struct LimitedHex<'a> {
    inner: &'a [u8],
    max_bytes: usize,
}

impl<'a> LimitedHex<'a> {
    pub fn new(inner: &'a [u8], max_bytes: usize) -> Self {
        Self { inner, max_bytes }
    }

    /// Returns the shown prefix and the count of bytes left out.
    fn split(&self) -> (&'a [u8], usize) {
        match self.inner.len().checked_sub(self.max_bytes) {
            Some(omitted) if omitted > 0 => (&self.inner[..self.max_bytes], omitted),
            _ => (self.inner, 0),
        }
    }
}

impl<'a> std::fmt::Debug for LimitedHex<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (print, omitted) = self.split();
        writeln!(f, "Length: {0} (0x{0:x}) bytes", self.inner.len())?;
        write!(
            f,
            "{:#?}",
            print.hex_conf(pretty_hex::HexConfig {
                title: false,
                ..Default::default()
            })
        )?;
        if omitted > 0 {
            write!(f, "\n...{0} (0x{0:x}) bytes not shown...", omitted)?;
        }
        Ok(())
    }
}

/// Compact single-line form: space-separated bytes, then a count of the rest.
impl<'a> std::fmt::Display for LimitedHex<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (print, omitted) = self.split();
        for (i, b) in print.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        if omitted > 0 {
            write!(f, " (+{} bytes)", omitted)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::LimitedHex;

    #[test]
    fn display_truncates() {
        let data = [0x00, 0x00, 0x00, 0x01, 0x67, 0x4d];
        assert_eq!(
            LimitedHex::new(&data, 4).to_string(),
            "00 00 00 01 (+2 bytes)"
        );
        assert_eq!(LimitedHex::new(&data[..2], 4).to_string(), "00 00");
    }

    #[test]
    fn debug_notes_omitted() {
        let data = [0u8; 100];
        let s = format!("{:?}", LimitedHex::new(&data, 16));
        assert!(s.starts_with("Length: 100 (0x64) bytes\n"), "{s}");
        assert!(s.ends_with("...84 (0x54) bytes not shown..."), "{s}");
    }
}

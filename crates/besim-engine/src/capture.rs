//! Optional packet-capture side-log.
//!
//! Grounded on `proxyUdpServer.py`'s `datalog` writer: one CSV-quoted
//! line per record, flushed and `fsync`'d immediately, so a capture
//! survives a crash mid-run. Disabled unless a path is configured.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

pub struct Capture {
    file: Mutex<File>,
}

impl Capture {
    pub fn open(path: &str) -> std::io::Result<Capture> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Capture { file: Mutex::new(file) })
    }

    fn write_record(&self, tag: char, fields: &[&str]) {
        let mut line = format!("\"{tag}\"");
        for field in fields {
            line.push_str(&format!(",\"{field}\""));
        }
        line.push_str("\r\n");
        let mut file = self.file.lock().unwrap();
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!(error = %e, "capture write failed");
            return;
        }
        let _ = file.flush();
        let _ = file.sync_all();
    }

    /// Inbound datagram, tag `"I"`.
    pub fn log_inbound(&self, addr: &str, data: &[u8]) {
        self.write_record('I', &[addr, &hex_dump(data)]);
    }

    /// Outbound datagram, tag `"O"`.
    pub fn log_outbound(&self, addr: &str, data: &[u8]) {
        self.write_record('O', &[addr, &hex_dump(data)]);
    }

    /// Cloud-relayed datagram, tag `"C"`.
    pub fn log_cloud(&self, addr: &str, data: &[u8]) {
        self.write_record('C', &[addr, &hex_dump(data)]);
    }
}

fn hex_dump(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_is_upper_hex_no_separators() {
        assert_eq!(hex_dump(&[0xFA, 0x0D, 0x01]), "FA0D01");
    }

    #[test]
    fn capture_appends_a_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let capture = Capture::open(path.to_str().unwrap()).unwrap();
        capture.log_inbound("1.2.3.4:6199", &[0xAB]);
        capture.log_outbound("1.2.3.4:6199", &[0xCD]);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"I\""));
        assert!(contents.contains("AB"));
    }
}

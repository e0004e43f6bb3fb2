//! A simulated LDATA bootloader console, good enough to run the whole unlock
//! procedure against.

#![allow(dead_code)]

use std::{
    cell::RefCell,
    collections::{BTreeMap, VecDeque},
    rc::Rc,
    time::{Duration, Instant},
};

use ldata_unlock::{Delays, Result, Settings, SettingsBuilder, Transport};

pub const PROMPT: &str = "\r\nMX6UL_VAR_DART(mmc)==> ";
pub const API_BANNER_LINE: &str = "ldata[312]: HTTP API server started on port 8080\r\n";

pub const ENV: &str = "baudrate=115200\r\n\
bootdelay=3\r\n\
eth1addr=00:11:22:33:44:56\r\n\
ethaddr=00:11:22:33:44:55\r\n\
mmcdev=1\r\n\
mmcpart=1\r\n\
\r\n\
Environment size: 2410/8188 bytes\r\n";

pub const PART_TABLE: &str = "\r\nPartition Map for MMC device 1  --   Partition Type: DOS\r\n\
\r\n\
Part\tStart Sector\tNum Sectors\tUUID\t\tType\r\n\
  1\t2048      \t16384     \t0d2a1f4e-01\t0c\r\n\
  2\t18432     \t7516160   \t0d2a1f4e-02\t83\r\n\
  3\t7534592    \t32768     \t0d2a1f4e-03\t83\r\n";

/// The board behind the console. Tests keep a handle on it to script its
/// behaviour and inspect what was sent.
pub struct Board {
    pub env: String,
    pub part_table: String,
    /// Sparse RAM, absent addresses read as zero.
    pub ram: BTreeMap<u32, u8>,
    /// Files per partition index.
    pub files: BTreeMap<u32, BTreeMap<String, Vec<u8>>>,
    /// Every non-empty line received, in order.
    pub commands: Vec<String>,
    /// Number of empty lines (nudges) received.
    pub nudges: usize,
    /// The prompt shows up on the nudge with this number (1 based). `None`
    /// means the board never stops in the bootloader.
    pub prompt_on_nudge: Option<usize>,
    /// Report every dumped byte as `00`.
    pub corrupt_dump: bool,
    /// `ext4write` fails without storing anything.
    pub read_only: bool,
    /// Print the API banner after a reset when the flag file exists.
    pub api_on_reset: bool,
    /// How long after the reset the API banner is printed.
    pub api_delay: Duration,
    /// `ext4write` answers only after the next command line was typed.
    pub slow_write: bool,
    /// Hand over at most this many bytes per poll and read.
    pub max_chunk: Option<usize>,
    pub rebooting: bool,
    output: VecDeque<u8>,
    late: Option<String>,
    scheduled: Vec<(Instant, String)>,
    line: Vec<u8>,
}

impl Default for Board {
    fn default() -> Self {
        Board {
            env: ENV.into(),
            part_table: PART_TABLE.into(),
            ram: BTreeMap::new(),
            files: BTreeMap::new(),
            commands: Vec::new(),
            nudges: 0,
            prompt_on_nudge: Some(1),
            corrupt_dump: false,
            read_only: false,
            api_on_reset: true,
            api_delay: Duration::from_millis(0),
            slow_write: false,
            max_chunk: None,
            rebooting: false,
            output: VecDeque::new(),
            late: None,
            scheduled: Vec::new(),
            line: Vec::new(),
        }
    }
}

impl Board {
    /// How many received commands start with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.commands.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn file(&self, partition: u32, name: &str) -> Option<&Vec<u8>> {
        self.files.get(&partition).and_then(|files| files.get(name))
    }

    /// Make the board print something on its own, as if it was booting.
    pub fn emit(&mut self, text: &str) {
        self.output.extend(text.as_bytes());
    }

    /// Move scheduled output that is due into the output queue.
    fn release_due(&mut self) {
        let now = Instant::now();
        let (due, later): (Vec<_>, Vec<_>) = self.scheduled.drain(..).partition(|(at, _)| *at <= now);
        self.scheduled = later;
        for (_, text) in due {
            self.emit(&text);
        }
    }

    fn receive(&mut self, data: &[u8]) {
        for &b in data {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&self.line).trim().to_string();
                self.line.clear();
                self.execute(&line);
            } else {
                self.line.push(b);
            }
        }
    }

    fn execute(&mut self, line: &str) {
        if line.is_empty() {
            self.nudges += 1;
            if self.rebooting {
                return;
            }
            match self.prompt_on_nudge {
                Some(n) if self.nudges >= n => self.emit(PROMPT),
                _ => self.emit("Hit any key to stop autoboot:  0 \r\n"),
            }
            return;
        }

        self.commands.push(line.to_string());
        self.emit(&format!("{}\r\n", line));
        if let Some(late) = self.late.take() {
            self.emit(&late);
        }
        let words: Vec<&str> = line.split_whitespace().collect();
        let reply = match words.as_slice() {
            ["printenv"] => self.env.clone(),
            ["mmc", "dev", n] => format!(
                "switch to partitions #0, OK\r\nmmc{}(part 0) is current device\r\n",
                n
            ),
            ["mmc", "part"] => self.part_table.clone(),
            ["mw.b", addr, value] => self.fill(addr, value, "1"),
            ["mw.b", addr, value, count] => self.fill(addr, value, count),
            ["md.b", addr, count] => self.dump(addr, count),
            ["ext4write", "mmc", dev_part, addr, path, len] => {
                let reply = self.ext4write(dev_part, addr, path, len);
                if self.slow_write {
                    self.late = Some(format!("{}{}", reply, PROMPT));
                    return;
                }
                reply
            }
            ["ext4ls", "mmc", dev_part] => self.ext4ls(dev_part),
            ["reset"] => {
                self.rebooting = true;
                self.emit("resetting ...\r\n\r\nU-Boot 2016.03 (Oct 02 2019)\r\n");
                if self.api_on_reset && self.file(2, "HTTP_API_ALWAYS_ON").is_some() {
                    self.emit("Starting kernel ...\r\n");
                    let at = Instant::now() + self.api_delay;
                    self.scheduled.push((at, API_BANNER_LINE.to_string()));
                }
                return;
            }
            _ => format!("Unknown command '{}' - try 'help'\r\n", words[0]),
        };
        self.emit(&reply);
        self.emit(PROMPT);
    }

    fn fill(&mut self, addr: &str, value: &str, count: &str) -> String {
        let (addr, value, count) = match (hex(addr), hex(value), hex(count)) {
            (Some(a), Some(v), Some(c)) => (a, v as u8, c),
            _ => return "Usage:\r\nmw - memory write (fill)\r\n".into(),
        };
        if value == 0 {
            self.ram.retain(|a, _| *a < addr || *a >= addr + count);
        } else {
            for a in addr..addr + count {
                self.ram.insert(a, value);
            }
        }
        String::new()
    }

    fn dump(&mut self, addr: &str, count: &str) -> String {
        let (addr, count) = match (hex(addr), hex(count)) {
            (Some(a), Some(c)) => (a, c),
            _ => return "Usage:\r\nmd - memory display\r\n".into(),
        };
        let mut out = String::new();
        for row in (addr..addr + count).step_by(16) {
            let end = (row + 16).min(addr + count);
            let bytes: Vec<u8> = (row..end)
                .map(|a| {
                    if self.corrupt_dump {
                        0
                    } else {
                        *self.ram.get(&a).unwrap_or(&0)
                    }
                })
                .collect();
            let hex: Vec<String> = bytes.iter().map(|b| format!("{:02x}", b)).collect();
            let ascii: String = bytes
                .iter()
                .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
                .collect();
            out.push_str(&format!("{:08x}: {:<48}    {}\r\n", row, hex.join(" "), ascii));
        }
        out
    }

    fn ext4write(&mut self, dev_part: &str, addr: &str, path: &str, len: &str) -> String {
        let (part, addr, len) = match (partition(dev_part), hex(addr), hex(len)) {
            (Some(p), Some(a), Some(l)) => (p, a, l),
            _ => return "** Bad device specification **\r\n".into(),
        };
        if self.read_only {
            return "** Error ext4fs_write() **\r\n** Unable to write file /HTTP_API_ALWAYS_ON **\r\n"
                .into();
        }
        let content: Vec<u8> = (addr..addr + len)
            .map(|a| *self.ram.get(&a).unwrap_or(&0))
            .collect();
        self.files
            .entry(part)
            .or_default()
            .insert(path.trim_start_matches('/').to_string(), content);
        format!("File System is consistent\r\nupdate journal finished\r\n{} bytes written in 21 ms\r\n", len)
    }

    fn ext4ls(&mut self, dev_part: &str) -> String {
        let part = match partition(dev_part) {
            Some(p) => p,
            None => return "** Bad device specification **\r\n".into(),
        };
        let mut out = String::from("<DIR>       4096 .\r\n<DIR>       4096 ..\r\n<DIR>      16384 lost+found\r\n");
        if let Some(files) = self.files.get(&part) {
            for (name, content) in files {
                out.push_str(&format!("         {:>6} {}\r\n", content.len(), name));
            }
        }
        out
    }
}

/// Parse a number the way U-Boot does: hexadecimal, with or without `0x`.
fn hex(text: &str) -> Option<u32> {
    u32::from_str_radix(text.trim_start_matches("0x"), 16).ok()
}

/// The partition out of `<dev>:<part>`.
fn partition(dev_part: &str) -> Option<u32> {
    dev_part.split(':').nth(1).and_then(|p| p.parse().ok())
}

/// The serial end of the simulated board.
#[derive(Clone, Default)]
pub struct SimConsole {
    pub board: Rc<RefCell<Board>>,
}

impl SimConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }
}

impl Transport for SimConsole {
    fn name(&self) -> String {
        "sim".into()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.board.borrow_mut().receive(data);
        Ok(())
    }

    fn poll(&mut self) -> Result<usize> {
        let mut board = self.board.borrow_mut();
        board.release_due();
        let available = board.output.len();
        Ok(board.max_chunk.map_or(available, |max| available.min(max)))
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let mut board = self.board.borrow_mut();
        let mut n = buf.len().min(board.output.len());
        if let Some(max) = board.max_chunk {
            n = n.min(max);
        }
        for (slot, b) in buf.iter_mut().zip(board.output.drain(..n)) {
            *slot = b;
        }
        Ok(n)
    }
}

/// Settings with every delay shrunk so that tests run in milliseconds.
pub fn fast_settings() -> SettingsBuilder {
    SettingsBuilder::new()
        .path("sim")
        .delays(Delays::uniform(Duration::from_millis(1)))
        .prompt_timeout(Duration::from_millis(300))
        .manual_retry_timeout(Duration::from_millis(300))
        .api_timeout(Duration::from_secs(2))
}

pub fn settings() -> Settings {
    fast_settings().finalize()
}

use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::time::{Duration, Instant};

use serialport::{SerialPortInfo, SerialPortType};
use thiserror::Error;

/// A serial endpoint as reported by one enumeration pass. Never cached: every
/// call to `Ports::list` builds fresh descriptors.
#[derive(Clone, Debug, PartialEq)]
pub struct PortDescriptor {
    pub device: String,
    pub description: String,
}

impl PortDescriptor {
    pub fn new(device: impl Into<String>, description: impl Into<String>) -> PortDescriptor {
        PortDescriptor {
            device: device.into(),
            description: description.into(),
        }
    }
}

impl From<SerialPortInfo> for PortDescriptor {
    fn from(info: SerialPortInfo) -> Self {
        let description = match info.port_type {
            SerialPortType::UsbPort(usb) => match (usb.product, usb.manufacturer) {
                (Some(product), _) => product,
                (None, Some(manufacturer)) => manufacturer,
                (None, None) => format!("USB device {:04x}:{:04x}", usb.vid, usb.pid),
            },
            SerialPortType::PciPort => "PCI device".to_string(),
            SerialPortType::BluetoothPort => "Bluetooth device".to_string(),
            SerialPortType::Unknown => "n/a".to_string(),
        };
        PortDescriptor {
            device: info.port_name,
            description,
        }
    }
}

impl fmt::Display for PortDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.device, self.description)
    }
}

/// Everything needed to open a port. Framing is always 8N1.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum OpenError {
    #[error("permission denied ({0})")]
    PermissionDenied(String),
    #[error("device busy ({0})")]
    Busy(String),
    #[error("device not found ({0})")]
    Vanished(String),
    #[error("{0}")]
    Other(String),
}

impl From<serialport::Error> for OpenError {
    fn from(error: serialport::Error) -> Self {
        let description = error.description;
        match error.kind {
            serialport::ErrorKind::NoDevice
            | serialport::ErrorKind::Io(io::ErrorKind::NotFound) => {
                OpenError::Vanished(description)
            }
            serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => {
                OpenError::PermissionDenied(description)
            }
            // serialport doesn't map EBUSY (e.g. TIOCEXCL held by another
            // process) to a dedicated kind, only the description tells.
            _ if description.to_ascii_lowercase().contains("busy") => {
                OpenError::Busy(description)
            }
            _ => OpenError::Other(description),
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("connection closed by device")]
    Closed,
}

impl From<serialport::Error> for ReadError {
    fn from(error: serialport::Error) -> Self {
        ReadError::Io(error.into())
    }
}

/// An open port. Dropping a handle also releases it, `close` exists so that
/// callers can observe (and ignore) release failures.
pub trait PortHandle {
    /// Number of bytes that can be read without blocking.
    fn bytes_to_read(&mut self) -> Result<usize, ReadError>;
    /// Reads up to and including the next `\n`, or whatever arrived before
    /// the read timeout expired. May return an empty buffer.
    fn read_line(&mut self) -> Result<Vec<u8>, ReadError>;
    fn close(self) -> io::Result<()>;
}

/// Port enumeration and opening, i.e. the OS side of the monitor.
pub trait Ports {
    type Handle: PortHandle;

    /// Lists the ports currently present, in OS order. Enumeration failures
    /// are reported as an empty list.
    fn list(&mut self) -> Vec<PortDescriptor>;
    fn open(&mut self, device: &str, settings: &LinkSettings) -> Result<Self::Handle, OpenError>;
}

/// The real thing, backed by the serialport crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPorts;

impl Ports for SystemPorts {
    type Handle = SerialHandle;

    fn list(&mut self) -> Vec<PortDescriptor> {
        match serialport::available_ports() {
            Ok(ports) => ports.into_iter().map(PortDescriptor::from).collect(),
            Err(e) => {
                log::warn!("failed to enumerate serial ports: {e}");
                Vec::new()
            }
        }
    }

    fn open(&mut self, device: &str, settings: &LinkSettings) -> Result<SerialHandle, OpenError> {
        let port = serialport::new(device, settings.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(settings.read_timeout)
            .open()?;
        log::debug!("opened {device} at {} baud", settings.baud_rate);
        Ok(SerialHandle::new(port))
    }
}

/// Longest piece of output handed out as one line. Devices that never send
/// a newline get their output split into chunks of (at most) this size.
pub const MAX_LINE_LEN: usize = 4096;

/// Reads up to and including the next `\n`. Stops early, returning what it
/// has so far, when the reader times out, hits EOF, `MAX_LINE_LEN` bytes
/// have been collected, or `budget` has been used up. The budget is only
/// checked between reads, so a single blocking read may overrun it by one
/// read timeout.
pub(crate) fn read_line_bounded<R: BufRead>(
    reader: &mut R,
    budget: Duration,
) -> Result<Vec<u8>, ReadError> {
    let started = Instant::now();
    let mut line = Vec::new();
    loop {
        let chunk = match reader.fill_buf() {
            Ok(chunk) => chunk,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(line),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ReadError::Io(e)),
        };
        if chunk.is_empty() {
            // A serial port only reports EOF once the device is gone.
            return if line.is_empty() {
                Err(ReadError::Closed)
            } else {
                Ok(line)
            };
        }

        let room = MAX_LINE_LEN - line.len();
        let window = &chunk[..chunk.len().min(room)];
        let (taken, found_newline) = match window.iter().position(|b| *b == b'\n') {
            Some(i) => (i + 1, true),
            None => (window.len(), false),
        };
        line.extend_from_slice(&window[..taken]);
        reader.consume(taken);

        if found_newline || line.len() >= MAX_LINE_LEN || started.elapsed() >= budget {
            return Ok(line);
        }
    }
}

pub struct SerialHandle {
    reader: BufReader<Box<dyn serialport::SerialPort>>,
    // Upper bound for a single read_line, so that an endless stream without
    // newlines can't keep us reading forever.
    read_budget: Duration,
}

impl SerialHandle {
    pub fn new(port: Box<dyn serialport::SerialPort>) -> SerialHandle {
        SerialHandle {
            read_budget: port.timeout(),
            reader: BufReader::new(port),
        }
    }
}

impl PortHandle for SerialHandle {
    fn bytes_to_read(&mut self) -> Result<usize, ReadError> {
        // Bytes already pulled into our buffer by a previous read count too,
        // the OS no longer knows about them.
        let buffered = self.reader.buffer().len();
        if buffered > 0 {
            return Ok(buffered);
        }
        Ok(self.reader.get_ref().bytes_to_read()? as usize)
    }

    fn read_line(&mut self) -> Result<Vec<u8>, ReadError> {
        read_line_bounded(&mut self.reader, self.read_budget)
    }

    fn close(self) -> io::Result<()> {
        let port = self.reader.into_inner();
        port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;
    use std::collections::VecDeque;

    #[test]
    fn test_descriptor_from_port_info() {
        struct TestCase<'a> {
            name: &'a str,
            port_type: SerialPortType,
            expected_description: &'a str,
        }
        let usb = |manufacturer: Option<&str>, product: Option<&str>| {
            SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x16c0,
                pid: 0x0483,
                serial_number: None,
                manufacturer: manufacturer.map(str::to_string),
                product: product.map(str::to_string),
            })
        };
        let tests = [
            TestCase {
                name: "usb with product",
                port_type: usb(Some("Teensyduino"), Some("USB Serial")),
                expected_description: "USB Serial",
            },
            TestCase {
                name: "usb with manufacturer only",
                port_type: usb(Some("Teensyduino"), None),
                expected_description: "Teensyduino",
            },
            TestCase {
                name: "bare usb",
                port_type: usb(None, None),
                expected_description: "USB device 16c0:0483",
            },
            TestCase {
                name: "pci",
                port_type: SerialPortType::PciPort,
                expected_description: "PCI device",
            },
            TestCase {
                name: "unknown",
                port_type: SerialPortType::Unknown,
                expected_description: "n/a",
            },
        ];
        for test in tests {
            let descriptor = PortDescriptor::from(SerialPortInfo {
                port_name: "/dev/ttyACM0".to_string(),
                port_type: test.port_type,
            });
            assert_eq!(descriptor.device, "/dev/ttyACM0", "{0}", test.name);
            assert_eq!(
                descriptor.description, test.expected_description,
                "{0}",
                test.name
            );
        }
    }

    #[test]
    fn test_descriptor_display() {
        let descriptor = PortDescriptor::new("COM3", "USB Serial Device");
        assert_eq!(descriptor.to_string(), "COM3 - USB Serial Device");
    }

    #[test]
    fn test_open_error_classification() {
        let error = |kind, description: &str| serialport::Error::new(kind, description);
        assert_eq!(
            OpenError::from(error(serialport::ErrorKind::NoDevice, "gone")),
            OpenError::Vanished("gone".to_string())
        );
        assert_eq!(
            OpenError::from(error(
                serialport::ErrorKind::Io(io::ErrorKind::NotFound),
                "No such file or directory"
            )),
            OpenError::Vanished("No such file or directory".to_string())
        );
        assert_eq!(
            OpenError::from(error(
                serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied),
                "Permission denied"
            )),
            OpenError::PermissionDenied("Permission denied".to_string())
        );
        assert_eq!(
            OpenError::from(error(
                serialport::ErrorKind::Io(io::ErrorKind::Other),
                "Device or resource busy"
            )),
            OpenError::Busy("Device or resource busy".to_string())
        );
        assert_eq!(
            OpenError::from(error(serialport::ErrorKind::InvalidInput, "bad baud")),
            OpenError::Other("bad baud".to_string())
        );
    }

    /// Hands out scripted reads one at a time, then EOF.
    struct ScriptedReader {
        reads: VecDeque<io::Result<Vec<u8>>>,
    }

    impl io::Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.reads.pop_front() {
                Some(Ok(mut data)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    if n < data.len() {
                        self.reads.push_front(Ok(data.split_off(n)));
                    }
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Ok(0),
            }
        }
    }

    #[derive(Debug, PartialEq)]
    enum Expected {
        Line(Vec<u8>),
        Closed,
        Io(io::ErrorKind),
    }

    #[test]
    fn test_read_line_bounded() {
        struct TestCase<'a> {
            name: &'a str,
            reads: Vec<io::Result<Vec<u8>>>,
            expected_result: Expected,
        }
        let timed_out = || Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
        let tests = [
            TestCase {
                name: "stops at newline",
                reads: vec![Ok(b"one\ntwo\n".to_vec())],
                expected_result: Expected::Line(b"one\n".to_vec()),
            },
            TestCase {
                name: "line split across reads",
                reads: vec![Ok(b"on".to_vec()), Ok(b"e\r\n".to_vec())],
                expected_result: Expected::Line(b"one\r\n".to_vec()),
            },
            TestCase {
                name: "partial line before timeout",
                reads: vec![Ok(b"ab".to_vec()), Ok(b"c".to_vec()), timed_out()],
                expected_result: Expected::Line(b"abc".to_vec()),
            },
            TestCase {
                name: "timeout without data",
                reads: vec![timed_out()],
                expected_result: Expected::Line(Vec::new()),
            },
            TestCase {
                name: "partial line before eof",
                reads: vec![Ok(b"abc".to_vec())],
                expected_result: Expected::Line(b"abc".to_vec()),
            },
            TestCase {
                name: "eof",
                reads: vec![],
                expected_result: Expected::Closed,
            },
            TestCase {
                name: "interrupted read is retried",
                reads: vec![
                    Err(io::Error::new(io::ErrorKind::Interrupted, "EINTR")),
                    Ok(b"ok\n".to_vec()),
                ],
                expected_result: Expected::Line(b"ok\n".to_vec()),
            },
            TestCase {
                name: "io error",
                reads: vec![Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "Input/output error",
                ))],
                expected_result: Expected::Io(io::ErrorKind::BrokenPipe),
            },
            TestCase {
                name: "endless line is capped",
                reads: vec![Ok(vec![0xaa; MAX_LINE_LEN * 3])],
                expected_result: Expected::Line(vec![0xaa; MAX_LINE_LEN]),
            },
            TestCase {
                name: "newline past the cap",
                reads: vec![Ok([vec![b'x'; MAX_LINE_LEN], b"\n".to_vec()].concat())],
                expected_result: Expected::Line(vec![b'x'; MAX_LINE_LEN]),
            },
        ];
        for test in tests {
            let mut reader = BufReader::with_capacity(
                1024,
                ScriptedReader {
                    reads: test.reads.into(),
                },
            );
            let result = match read_line_bounded(&mut reader, Duration::from_secs(60)) {
                Ok(line) => Expected::Line(line),
                Err(ReadError::Closed) => Expected::Closed,
                Err(ReadError::Io(e)) => Expected::Io(e.kind()),
            };
            assert_eq!(result, test.expected_result, "{0}", test.name);
        }
    }

    #[test]
    fn test_read_line_bounded_keeps_remainder() {
        let mut reader = BufReader::new(&b"one\ntwo"[..]);
        assert_eq!(
            read_line_bounded(&mut reader, Duration::from_secs(60)).unwrap(),
            b"one\n"
        );
        assert_eq!(reader.buffer(), b"two");
        assert_eq!(
            read_line_bounded(&mut reader, Duration::from_secs(60)).unwrap(),
            b"two"
        );
    }

    #[test]
    fn test_read_line_bounded_budget() {
        // Never-ending data without a newline, in small pieces.
        let reads = (0..MAX_LINE_LEN).map(|_| Ok(vec![0xaa])).collect();
        let mut reader = BufReader::new(ScriptedReader { reads });
        let line = read_line_bounded(&mut reader, Duration::ZERO).unwrap();
        assert_eq!(line, vec![0xaa], "a spent budget stops after one read");
    }

    #[cfg(unix)]
    mod tty {
        use super::super::*;
        use serialport::{SerialPort, TTYPort};
        use std::io::Write;
        use std::thread;

        fn pair(timeout: Duration) -> (TTYPort, SerialHandle) {
            let (master, mut slave) = TTYPort::pair().unwrap();
            slave.set_timeout(timeout).unwrap();
            (master, SerialHandle::new(Box::new(slave)))
        }

        fn wait_for_bytes(handle: &mut SerialHandle, count: usize) {
            for _ in 0..100 {
                if handle.bytes_to_read().unwrap() >= count {
                    return;
                }
                thread::sleep(Duration::from_millis(10));
            }
            panic!("never saw {count} bytes");
        }

        #[test]
        fn test_endless_stream_returns() {
            let (mut master, mut handle) = pair(Duration::from_millis(200));
            let writer = thread::spawn(move || {
                for _ in 0..60 {
                    if master.write_all(&[0xaa; 16]).is_err() {
                        return;
                    }
                    thread::sleep(Duration::from_millis(50));
                }
            });

            wait_for_bytes(&mut handle, 16);
            let started = Instant::now();
            let line = handle.read_line().unwrap();
            let took = started.elapsed();
            assert!(
                took < Duration::from_secs(2),
                "read_line must not follow the stream (took {took:?})"
            );
            assert!(!line.is_empty());
            assert!(line.len() <= MAX_LINE_LEN);
            assert!(line.iter().all(|b| *b == 0xaa));

            drop(handle);
            writer.join().unwrap();
        }

        #[test]
        fn test_partial_line_on_timeout() {
            let (mut master, mut handle) = pair(Duration::from_millis(100));
            master.write_all(b"abc").unwrap();
            wait_for_bytes(&mut handle, 3);
            assert_eq!(handle.read_line().unwrap(), b"abc");
            // Nothing left: a timed out read gives an empty line.
            assert_eq!(handle.read_line().unwrap(), b"");
        }

        #[test]
        fn test_buffered_bytes_count_as_available() {
            let (mut master, mut handle) = pair(Duration::from_millis(100));
            master.write_all(b"one\ntwo\n").unwrap();
            wait_for_bytes(&mut handle, 8);

            assert_eq!(handle.read_line().unwrap(), b"one\n");
            // "two\n" now sits in our buffer rather than in the OS.
            assert_eq!(handle.bytes_to_read().unwrap(), 4);
            assert_eq!(handle.read_line().unwrap(), b"two\n");
            assert_eq!(handle.bytes_to_read().unwrap(), 0);
        }

        #[test]
        fn test_close() {
            let (_master, handle) = pair(Duration::from_millis(100));
            assert!(handle.close().is_ok());
        }
    }
}

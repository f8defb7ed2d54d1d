//! The transport-independent SCPI engine: open/send/read/close, response
//! parsing, the OPC handshake, and the IEEE-488.2 block format.

use std::collections::HashMap;
use std::sync::Mutex;

use bitflags::bitflags;

use crate::error::{Error, ErrorKind, Result};

/// The operation vector every SCPI transport backend implements
/// (spec §4.G / design note "Transport polymorphism").
pub trait Transport: Send {
    /// Open the underlying connection.
    fn open(&mut self) -> Result<()>;

    /// A backend-specific connection identifier, e.g. `"usbtmc/1.23"`.
    fn connection_id(&self) -> String;

    /// Send a fully-formed command string (terminator policy is the
    /// caller's responsibility via `ScpiQuirks::NO_TERMINATOR`).
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Mark the start of a response read (resets any "read started" state
    /// some backends track, e.g. libgpib's END status bit).
    fn read_begin(&mut self) -> Result<()>;

    /// Read up to `buf.len()` bytes of response data, returning the number
    /// read. `0` means no more data is currently available (not EOF).
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Whether the most recent response has been fully read.
    fn read_complete(&self) -> bool;

    /// Close the underlying connection.
    fn close(&mut self) -> Result<()>;
}

bitflags! {
    /// Per-driver quirks a command table can declare.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ScpiQuirks: u32 {
        /// Omit the line terminator on output.
        const NO_TERMINATOR = 1 << 0;
        /// Never issue `*OPC?`.
        const NO_OPC = 1 << 1;
        /// Insert a delay after switching the selected channel.
        const SLOW_CHANNEL_SELECT = 1 << 2;
    }
}

/// How long `ScpiDevice::scpi_cmd`/`scpi_cmd_resp` wait after a channel
/// select when the command table declares `ScpiQuirks::SLOW_CHANNEL_SELECT`,
/// e.g. for relay-switched input muxes that need settling time.
const CHANNEL_SELECT_SETTLE: std::time::Duration = std::time::Duration::from_millis(50);

/// A parsed `*IDN?` response: vendor, model, serial, firmware version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwId {
    /// Vendor field.
    pub vendor: String,
    /// Model field.
    pub model: String,
    /// Serial number field.
    pub serial: String,
    /// Firmware/hardware version field.
    pub version: String,
}

/// A firmware version string, kept both raw and as a best-effort parsed
/// `(major, minor)` pair for quirk gating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion {
    /// Raw version string as reported by `*IDN?`.
    pub raw: String,
    /// Parsed `(major, minor)`, if the string was `<digits>.<digits>...`.
    pub parsed: Option<(u32, u32)>,
}

impl FirmwareVersion {
    /// Parse a version string, tolerating trailing non-numeric suffixes
    /// (e.g. `"1.42-beta"` parses as `(1, 42)`).
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.splitn(3, '.');
        let major = parts.next().and_then(|s| s.parse::<u32>().ok());
        let minor = parts
            .next()
            .and_then(|s| s.chars().take_while(|c| c.is_ascii_digit()).collect::<String>().parse::<u32>().ok());
        FirmwareVersion {
            raw: raw.to_string(),
            parsed: major.zip(minor),
        }
    }

    /// Whether this version is at least `(major, minor)`, by lexicographic
    /// pair comparison. Unparsed versions always compare `false`.
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        matches!(self.parsed, Some((maj, min)) if (maj, min) >= (major, minor))
    }
}

/// A closed set of command identifiers a per-driver command table keys on
/// (spec §4.F/§6, the `GET_*`/`SET_*` identifiers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum CommandId {
    /// `*IDN?`
    GetHwId,
    /// `*OPC?`
    GetOpc,
    GetTimebase,
    SetTimebase,
    GetVerticalScale,
    SetVerticalScale,
    GetTriggerSource,
    SetTriggerSource,
    GetTriggerSlope,
    SetTriggerSlope,
    GetCoupling,
    SetCoupling,
    GetSamplerate,
    SetSamplerate,
    GetVoltageTarget,
    SetVoltageTarget,
    GetCurrentLimit,
    SetCurrentLimit,
    GetOutputEnabled,
    SetOutputEnabled,
    /// Select the active channel before a subsequent command.
    SelectChannel,
}

/// A driver's command table: `CommandId -> printf-style template string`.
/// `%s` substitutes a string argument, `%d` a decimal integer. Substitution
/// is a small internal token replacement, not a generic printf engine.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: HashMap<CommandId, &'static str>,
    quirks: ScpiQuirks,
}

/// One substitution argument for [`CommandTable::format`].
#[derive(Debug, Clone)]
pub enum Arg {
    /// Substitutes into a `%s` token.
    Str(String),
    /// Substitutes into a `%d` token.
    Int(i64),
}

impl CommandTable {
    /// Build a table from `(id, template)` pairs and quirk bits.
    pub fn new(commands: Vec<(CommandId, &'static str)>, quirks: ScpiQuirks) -> Self {
        CommandTable {
            commands: commands.into_iter().collect(),
            quirks,
        }
    }

    /// This table's quirk bits.
    pub fn quirks(&self) -> ScpiQuirks {
        self.quirks
    }

    /// Look up and format a command's template with `args`, substituting
    /// `%s`/`%d` tokens left to right.
    pub fn format(&self, id: CommandId, args: &[Arg]) -> Result<String> {
        let template = self
            .commands
            .get(&id)
            .ok_or_else(|| Error::new(ErrorKind::NotApplicable, format!("command {:?} not in table", id)))?;
        let mut out = String::with_capacity(template.len());
        let mut arg_iter = args.iter();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '%' {
                match chars.next() {
                    Some('s') => match arg_iter.next() {
                        Some(Arg::Str(s)) => out.push_str(s),
                        Some(Arg::Int(n)) => out.push_str(&n.to_string()),
                        None => return Err(Error::new(ErrorKind::Arg, "missing argument for %s")),
                    },
                    Some('d') => match arg_iter.next() {
                        Some(Arg::Int(n)) => out.push_str(&n.to_string()),
                        Some(Arg::Str(s)) => out.push_str(s),
                        None => return Err(Error::new(ErrorKind::Arg, "missing argument for %d")),
                    },
                    Some('%') => out.push('%'),
                    Some(other) => {
                        out.push('%');
                        out.push(other);
                    }
                    None => out.push('%'),
                }
            } else {
                out.push(c);
            }
        }
        Ok(out)
    }
}

/// A SCPI device instance: a named, transport-backed endpoint with its own
/// serialization mutex, timeout, cached firmware version, and quirks
/// (spec §3, "SCPI device instance").
pub struct ScpiDevice {
    /// Full device name, e.g. the driver's long name.
    pub name: String,
    /// Short command prefix, e.g. `"RIGOL"`.
    pub prefix: String,
    transport: Box<dyn Transport>,
    /// Serializes composite request/response helpers so partial reads from
    /// two calls are never interleaved.
    lock: Mutex<()>,
    /// Read timeout, microseconds.
    pub read_timeout_us: u64,
    /// Cached `*IDN?` firmware version, used to gate vendor quirks.
    pub firmware_version: Option<FirmwareVersion>,
    /// Command table quirk bits.
    pub quirks: ScpiQuirks,
    /// Channel name to substitute into channel-select commands, if the
    /// driver has rewritten it from a user-facing label.
    pub actual_channel_name: Option<String>,
    /// Whether `*OPC?` is known unsupported on this device.
    pub opc_unsupported: bool,
    commands: CommandTable,
    /// Magnitude beyond which a parsed float is treated as infinity.
    pub infinity_limit: f64,
}

impl ScpiDevice {
    /// Construct a SCPI device around an already-built transport.
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, transport: Box<dyn Transport>, commands: CommandTable) -> Self {
        let quirks = commands.quirks();
        ScpiDevice {
            name: name.into(),
            prefix: prefix.into(),
            transport,
            lock: Mutex::new(()),
            read_timeout_us: 1_000_000,
            firmware_version: None,
            quirks,
            actual_channel_name: None,
            opc_unsupported: quirks.contains(ScpiQuirks::NO_OPC),
            commands,
            infinity_limit: 9.9e37,
        }
    }

    /// Open the transport.
    pub fn open(&mut self) -> Result<()> {
        self.transport.open()
    }

    /// Close the transport.
    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }

    /// This device's transport-specific connection id.
    pub fn connection_id(&self) -> String {
        self.transport.connection_id()
    }

    /// Send a raw command string, appending a terminator unless the quirk
    /// bit says otherwise.
    fn send_raw(&mut self, command: &str) -> Result<()> {
        let mut bytes = command.as_bytes().to_vec();
        if !self.quirks.contains(ScpiQuirks::NO_TERMINATOR) {
            bytes.push(b'\n');
        }
        self.transport.send(&bytes)
    }

    /// Send a pre-formatted command, serialized on the per-device mutex.
    pub fn send(&mut self, command: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.send_raw(command)
    }

    /// Read the full response to the last sent command as raw bytes, up to
    /// `max` bytes, serialized on the per-device mutex.
    pub fn get_data(&mut self, max: usize) -> Result<Vec<u8>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read_response_raw(max)
    }

    fn read_response_raw(&mut self, max: usize) -> Result<Vec<u8>> {
        self.transport.read_begin()?;
        let mut out = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = self.transport.read_data(&mut chunk)?;
            if n > 0 {
                out.extend_from_slice(&chunk[..n]);
            }
            if self.transport.read_complete() || out.len() >= max {
                break;
            }
            if n == 0 {
                break;
            }
        }
        Ok(out)
    }

    fn read_response_text(&mut self) -> Result<String> {
        let raw = self.read_response_raw(64 * 1024)?;
        let text = String::from_utf8_lossy(&raw);
        Ok(trim_response(&text))
    }

    /// `get_string`: the full response, quote-trimmed.
    pub fn get_string(&mut self, command: &str) -> Result<String> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.send_raw(command)?;
        let text = self.read_response_text()?;
        Ok(unquote(&text))
    }

    /// `get_bool`: `"1"`/`"ON"`/`"TRUE"` vs `"0"`/`"OFF"`/`"FALSE"`.
    pub fn get_bool(&mut self, command: &str) -> Result<bool> {
        let text = self.get_string(command)?;
        parse_bool(&text)
    }

    /// `get_int`.
    pub fn get_int(&mut self, command: &str) -> Result<i64> {
        let text = self.get_string(command)?;
        text.trim()
            .parse::<i64>()
            .map_err(|_| Error::new(ErrorKind::BadData, format!("not an integer: {:?}", text)))
    }

    /// `get_float` / `get_double`: accepts `INF`/`NAN`, clamps magnitudes
    /// beyond `infinity_limit` to infinity.
    pub fn get_double(&mut self, command: &str) -> Result<f64> {
        let text = self.get_string(command)?;
        parse_scpi_float(&text, self.infinity_limit)
    }

    /// `get_floatv`: a fixed-width comma-separated decimal array.
    pub fn get_floatv(&mut self, command: &str) -> Result<Vec<f64>> {
        let text = self.get_string(command)?;
        text.split(',')
            .map(|field| parse_scpi_float(field.trim(), self.infinity_limit))
            .collect()
    }

    /// `get_uint8v`: a comma-separated array of small unsigned integers.
    pub fn get_uint8v(&mut self, command: &str) -> Result<Vec<u8>> {
        let text = self.get_string(command)?;
        text.split(',')
            .map(|field| {
                field
                    .trim()
                    .parse::<u8>()
                    .map_err(|_| Error::new(ErrorKind::BadData, format!("not a u8: {:?}", field)))
            })
            .collect()
    }

    /// `get_block`: send `command`, then parse an IEEE-488.2 definite-length
    /// block from the response (spec §4.F).
    pub fn get_block(&mut self, command: &str) -> Result<Vec<u8>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.send_raw(command)?;
        let raw = self.read_response_raw(16 * 1024 * 1024)?;
        match parse_ieee_block(&raw, b'\n')? {
            Some(parsed) => Ok(parsed.payload),
            None => Err(Error::new(ErrorKind::BadData, "truncated IEEE-488.2 block")),
        }
    }

    /// `get_opc`: sends `*OPC?` and waits for `"1"`. Skipped (returns `Ok`
    /// immediately) when `opc_unsupported` is set.
    pub fn get_opc(&mut self) -> Result<()> {
        if self.opc_unsupported {
            return Ok(());
        }
        let text = self.get_string("*OPC?")?;
        if text.trim() == "1" {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::BadData, format!("unexpected *OPC? response: {:?}", text)))
        }
    }

    /// `get_hw_id`: sends `*IDN?` and parses the four comma-separated
    /// fields.
    pub fn get_hw_id(&mut self) -> Result<HwId> {
        let text = self.get_string("*IDN?")?;
        let fields: Vec<&str> = text.splitn(4, ',').collect();
        if fields.len() != 4 {
            return Err(Error::new(ErrorKind::BadData, format!("malformed *IDN? response: {:?}", text)));
        }
        Ok(HwId {
            vendor: unquote(fields[0].trim()),
            model: unquote(fields[1].trim()),
            serial: unquote(fields[2].trim()),
            version: unquote(fields[3].trim()),
        })
    }

    /// Cache the device's firmware version from a fresh `*IDN?` round trip.
    pub fn refresh_firmware_version(&mut self) -> Result<()> {
        let id = self.get_hw_id()?;
        self.firmware_version = Some(FirmwareVersion::parse(&id.version));
        Ok(())
    }

    /// Send the channel-select command for `channel`, if any, then —
    /// gated on `ScpiQuirks::SLOW_CHANNEL_SELECT` — block for
    /// [`CHANNEL_SELECT_SETTLE`] to give the instrument's relay/mux time to
    /// settle before the next command is issued.
    fn select_channel(&mut self, channel: Option<&str>) -> Result<()> {
        let Some(channel) = channel else { return Ok(()) };
        let select = self.commands.format(CommandId::SelectChannel, &[Arg::Str(channel.to_string())]);
        if let Ok(select) = select {
            self.send(&select)?;
            if self.quirks.contains(ScpiQuirks::SLOW_CHANNEL_SELECT) {
                std::thread::sleep(CHANNEL_SELECT_SETTLE);
            }
        }
        Ok(())
    }

    /// `scpi_cmd`: look up `id` in the command table, optionally prepend a
    /// channel-select command, substitute `args`, and send the result.
    pub fn scpi_cmd(&mut self, id: CommandId, channel: Option<&str>, args: &[Arg]) -> Result<()> {
        self.select_channel(channel)?;
        let command = self.commands.format(id, args)?;
        self.send(&command)
    }

    /// `scpi_cmd_resp`: like `scpi_cmd`, but reads and returns the string
    /// response.
    pub fn scpi_cmd_resp(&mut self, id: CommandId, channel: Option<&str>, args: &[Arg]) -> Result<String> {
        self.select_channel(channel)?;
        let command = self.commands.format(id, args)?;
        self.get_string(&command)
    }
}

/// Trim leading whitespace and a single trailing terminator character.
fn trim_response(text: &str) -> String {
    text.trim_start()
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Strip a single layer of SCPI-style quoting, un-escaping doubled inner
/// quotes.
fn unquote(text: &str) -> String {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'\'' || first == b'"') && first == last {
            let inner = &text[1..text.len() - 1];
            let doubled = format!("{}{}", first as char, first as char);
            return inner.replace(&doubled, &(first as char).to_string());
        }
    }
    text.to_string()
}

fn parse_bool(text: &str) -> Result<bool> {
    match text.trim().to_ascii_uppercase().as_str() {
        "1" | "ON" | "TRUE" | "YES" => Ok(true),
        "0" | "OFF" | "FALSE" | "NO" => Ok(false),
        other => Err(Error::new(ErrorKind::BadData, format!("not a boolean: {:?}", other))),
    }
}

fn parse_scpi_float(text: &str, infinity_limit: f64) -> Result<f64> {
    let trimmed = text.trim();
    let upper = trimmed.to_ascii_uppercase();
    let value = match upper.as_str() {
        "INF" | "+INF" | "INFINITY" => f64::INFINITY,
        "-INF" | "-INFINITY" => f64::NEG_INFINITY,
        "NAN" => f64::NAN,
        _ => trimmed
            .parse::<f64>()
            .map_err(|_| Error::new(ErrorKind::BadData, format!("not a float: {:?}", trimmed)))?,
    };
    if value.is_finite() && value.abs() > infinity_limit {
        Ok(if value.is_sign_negative() { f64::NEG_INFINITY } else { f64::INFINITY })
    } else {
        Ok(value)
    }
}

/// Result of successfully parsing one IEEE-488.2 definite-length block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IeeeBlockParse {
    /// The decoded payload bytes.
    pub payload: Vec<u8>,
    /// Total bytes of `buf` this parse consumed, including the trailing
    /// terminator.
    pub consumed: usize,
}

/// Parse `#<d><N_d_digits><N bytes><terminator>` from the start of `buf`
/// (spec §4.F, §8 scenario 3). Returns `Ok(None)` when `buf` does not yet
/// contain a complete block (caller should read more and retry); `Err` on a
/// malformed header.
pub fn parse_ieee_block(buf: &[u8], terminator: u8) -> Result<Option<IeeeBlockParse>> {
    let hash_pos = match buf.iter().position(|&b| b == b'#') {
        Some(pos) => pos,
        None => return Ok(None),
    };
    let rest = &buf[hash_pos..];
    if rest.len() < 2 {
        return Ok(None);
    }
    let d = rest[1];
    if !d.is_ascii_digit() || d == b'0' {
        return Err(Error::new(ErrorKind::BadData, "IEEE-488.2 block: invalid digit count"));
    }
    let n_digits = (d - b'0') as usize;
    if rest.len() < 2 + n_digits {
        return Ok(None);
    }
    let digits = &rest[2..2 + n_digits];
    if !digits.iter().all(u8::is_ascii_digit) {
        return Err(Error::new(ErrorKind::BadData, "IEEE-488.2 block: non-digit length field"));
    }
    let length_str = std::str::from_utf8(digits).unwrap();
    let length: usize = length_str
        .parse()
        .map_err(|_| Error::new(ErrorKind::BadData, "IEEE-488.2 block: length field overflow"))?;
    let header_len = 2 + n_digits;
    if rest.len() < header_len + length + 1 {
        return Ok(None);
    }
    let payload = rest[header_len..header_len + length].to_vec();
    let actual_terminator = rest[header_len + length];
    if actual_terminator != terminator {
        return Err(Error::new(
            ErrorKind::BadData,
            format!("IEEE-488.2 block: expected terminator {:?}, got {:?}", terminator as char, actual_terminator as char),
        ));
    }
    Ok(Some(IeeeBlockParse {
        payload,
        consumed: hash_pos + header_len + length + 1,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ieee_block_matches_scenario() {
        let input = b"#14ABCDX";
        let parsed = parse_ieee_block(input, b'X').unwrap().unwrap();
        assert_eq!(parsed.payload, b"ABCD");
        assert_eq!(parsed.consumed, input.len());
    }

    #[test]
    fn ieee_block_incomplete_returns_none() {
        let input = b"#14AB";
        assert_eq!(parse_ieee_block(input, b'X').unwrap(), None);
    }

    #[test]
    fn ieee_block_bad_digit_is_bad_data() {
        let input = b"#Xgarbage";
        let err = parse_ieee_block(input, b'\n').unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadData);
    }

    #[test]
    fn quoted_string_unescapes_doubled_quotes() {
        assert_eq!(unquote("\"ab\"\"cd\""), "ab\"cd");
        assert_eq!(unquote("'hello'"), "hello");
        assert_eq!(unquote("bare"), "bare");
    }

    #[test]
    fn float_parses_inf_and_nan() {
        assert_eq!(parse_scpi_float("INF", 9e37).unwrap(), f64::INFINITY);
        assert!(parse_scpi_float("NAN", 9e37).unwrap().is_nan());
        assert_eq!(parse_scpi_float("1e40", 9e37).unwrap(), f64::INFINITY);
    }

    #[test]
    fn command_table_substitutes_tokens() {
        let table = CommandTable::new(
            vec![(CommandId::SetVerticalScale, "CH%s:SCAL %d")],
            ScpiQuirks::empty(),
        );
        let out = table
            .format(CommandId::SetVerticalScale, &[Arg::Str("1".into()), Arg::Int(5)])
            .unwrap();
        assert_eq!(out, "CH1:SCAL 5");
    }

    #[test]
    fn firmware_version_gates_quirks() {
        let v = FirmwareVersion::parse("1.42-beta");
        assert!(v.at_least(1, 40));
        assert!(!v.at_least(1, 50));
        assert!(!v.at_least(2, 0));
    }

    struct RecordingTransport {
        sent: Vec<String>,
    }

    impl Transport for RecordingTransport {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }
        fn connection_id(&self) -> String {
            "mock/0".to_string()
        }
        fn send(&mut self, data: &[u8]) -> Result<()> {
            self.sent.push(String::from_utf8_lossy(data).trim_end().to_string());
            Ok(())
        }
        fn read_begin(&mut self) -> Result<()> {
            Ok(())
        }
        fn read_data(&mut self, _buf: &mut [u8]) -> Result<usize> {
            Ok(0)
        }
        fn read_complete(&self) -> bool {
            true
        }
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn slow_channel_select_quirk_delays_the_next_command() {
        let table = CommandTable::new(
            vec![
                (CommandId::SelectChannel, "CHAN%s"),
                (CommandId::SetVerticalScale, "CH%s:SCAL %d"),
            ],
            ScpiQuirks::SLOW_CHANNEL_SELECT,
        );
        let transport = Box::new(RecordingTransport { sent: Vec::new() });
        let mut dev = ScpiDevice::new("mock", "MOCK", transport, table);
        let start = std::time::Instant::now();
        dev.scpi_cmd(CommandId::SetVerticalScale, Some("1"), &[Arg::Str("1".into()), Arg::Int(5)])
            .unwrap();
        assert!(start.elapsed() >= CHANNEL_SELECT_SETTLE);
    }

    #[test]
    fn channel_select_without_quirk_does_not_delay() {
        let table = CommandTable::new(
            vec![
                (CommandId::SelectChannel, "CHAN%s"),
                (CommandId::SetVerticalScale, "CH%s:SCAL %d"),
            ],
            ScpiQuirks::empty(),
        );
        let transport = Box::new(RecordingTransport { sent: Vec::new() });
        let mut dev = ScpiDevice::new("mock", "MOCK", transport, table);
        let start = std::time::Instant::now();
        dev.scpi_cmd(CommandId::SetVerticalScale, Some("1"), &[Arg::Str("1".into()), Arg::Int(5)])
            .unwrap();
        assert!(start.elapsed() < CHANNEL_SELECT_SETTLE);
    }
}

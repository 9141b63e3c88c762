// eSCL (Applied Motion) line protocol over TCP
//
// Frame format: [0x00, 0x07, ASCII command..., 0x0D]
// There is no length field, so each TCP read is taken as one whole frame.

/// Frame header bytes
pub const HEADER: [u8; 2] = [0x00, 0x07];

/// Frame terminator (carriage return)
pub const TERMINATOR: u8 = 0x0D;

/// Smallest well-formed frame: header + terminator, empty payload
const MIN_FRAME_LEN: usize = HEADER.len() + 1;

/// Tokens a drive uses to acknowledge a command
const ACK_TOKENS: [&str; 3] = ["%", "*", "+"];

/// SCL command mnemonics used by the rig
pub mod cmd {
    pub const MOTION_ENABLE: &str = "ME";
    pub const ACCELERATION: &str = "AC";
    pub const DECELERATION: &str = "DE";
    pub const VELOCITY: &str = "VE";
    pub const DISTANCE: &str = "DI";
    pub const FEED_TO_POSITION: &str = "FP";
    pub const FEED_TO_LENGTH: &str = "FL";
    pub const REQUEST_STATUS: &str = "RS";
    pub const STOP: &str = "ST";
    pub const ALARM_RESET: &str = "AR";
    pub const ALARM_CODE: &str = "AL";
    pub const ANALOG_INPUT: &str = "IA";
    pub const FORMAT_DECIMAL: &str = "IFD";
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,

    #[error("Truncated frame: {len} bytes, need at least {min}")]
    Truncated { len: usize, min: usize },

    #[error("Frame payload is not ASCII: {0:02X?}")]
    NotAscii(Vec<u8>),
}

/// Frame a command for the wire.
pub fn encode(command: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MIN_FRAME_LEN + command.len());
    frame.extend_from_slice(&HEADER);
    frame.extend_from_slice(command.as_bytes());
    frame.push(TERMINATOR);
    frame
}

/// Strip header and terminator from a received frame and return the trimmed payload.
pub fn decode(raw: &[u8]) -> Result<String, ProtocolError> {
    if raw.is_empty() {
        return Err(ProtocolError::Empty);
    }
    if raw.len() < MIN_FRAME_LEN {
        return Err(ProtocolError::Truncated {
            len: raw.len(),
            min: MIN_FRAME_LEN,
        });
    }

    let payload = &raw[HEADER.len()..raw.len() - 1];
    if !payload.is_ascii() {
        return Err(ProtocolError::NotAscii(payload.to_vec()));
    }
    // is_ascii() guarantees valid UTF-8
    let text = String::from_utf8_lossy(payload);
    Ok(text.trim().to_string())
}

/// Format a numeric SCL argument: at most 4 decimals, no trailing zeros.
pub fn format_value(value: f64) -> String {
    let text = format!("{:.4}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Interpreted reply payload.
///
/// Firmware variants answer the same query as `%`, `+\r\n24567`, `IA1=24567` or `24567`;
/// all of them land in one of these variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedReply {
    Ack,
    Value(f64),
    Tagged(String, f64),
    Unparsed(String),
}

impl ParsedReply {
    pub fn parse(payload: &str) -> Self {
        let text = payload.trim();

        if ACK_TOKENS.contains(&text) {
            return ParsedReply::Ack;
        }

        // Ack followed by data on the next line
        let body = match ACK_TOKENS.iter().find_map(|ack| text.strip_prefix(ack)) {
            Some(rest) if rest.starts_with(['\r', '\n']) => rest.trim(),
            _ => text,
        };

        if let Some((key, value)) = body.split_once('=') {
            return match value.trim().parse::<f64>() {
                Ok(number) if number.is_finite() => {
                    ParsedReply::Tagged(key.trim().to_string(), number)
                }
                _ => ParsedReply::Unparsed(text.to_string()),
            };
        }

        match body.parse::<f64>() {
            Ok(number) if number.is_finite() => ParsedReply::Value(number),
            _ => ParsedReply::Unparsed(text.to_string()),
        }
    }

    /// Numeric content, whether bare or tagged.
    pub fn number(&self) -> Option<f64> {
        match self {
            ParsedReply::Value(v) | ParsedReply::Tagged(_, v) => Some(*v),
            _ => None,
        }
    }
}

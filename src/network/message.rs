use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Width of the command field at the front of every frame, NUL padded.
pub const COMMAND_LEN: usize = 12;

pub const NODE_VERSION: usize = 1;

const COMMANDS: [&str; 7] = [
    "addr",
    "block",
    "getblocks",
    "getdata",
    "inv",
    "tx",
    "version",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpType {
    Tx,
    Block,
}

/// One protocol message. On the wire it is the command name followed by the
/// variant's fields as a JSON object; blocks and transactions travel as their
/// binary encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Package {
    Addr {
        addr_list: Vec<String>,
    },
    Block {
        addr_from: String,
        block: Vec<u8>,
    },
    GetBlocks {
        addr_from: String,
    },
    GetData {
        addr_from: String,
        op_type: OpType,
        id: Vec<u8>,
    },
    Inv {
        addr_from: String,
        op_type: OpType,
        items: Vec<Vec<u8>>,
    },
    Tx {
        addr_from: String,
        transaction: Vec<u8>,
    },
    Version {
        addr_from: String,
        version: usize,
        best_height: usize,
    },
}

impl Package {
    pub fn command(&self) -> &'static str {
        match self {
            Package::Addr { .. } => "addr",
            Package::Block { .. } => "block",
            Package::GetBlocks { .. } => "getblocks",
            Package::GetData { .. } => "getdata",
            Package::Inv { .. } => "inv",
            Package::Tx { .. } => "tx",
            Package::Version { .. } => "version",
        }
    }

    /// Builds the full frame: command field, then payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let command = self.command();
        let payload = match serde_json::to_value(self)? {
            Value::Object(mut map) => map.remove(command),
            _ => None,
        }
        .ok_or_else(|| {
            BlockchainError::Serialization(format!("Cannot encode {command} payload"))
        })?;

        let mut frame = command_to_bytes(command)?;
        frame.extend(serde_json::to_vec(&payload)?);
        Ok(frame)
    }

    /// Parses a full frame. Unknown commands are reported as
    /// [`BlockchainError::UnknownCommand`].
    pub fn decode(frame: &[u8]) -> Result<Package> {
        if frame.len() < COMMAND_LEN {
            return Err(BlockchainError::Network(format!(
                "Frame too short: {} bytes",
                frame.len()
            )));
        }
        let (command_bytes, payload) = frame.split_at(COMMAND_LEN);
        let command = bytes_to_command(command_bytes)?;
        if !COMMANDS.contains(&command.as_str()) {
            return Err(BlockchainError::UnknownCommand(command));
        }

        let payload: Value = serde_json::from_slice(payload)?;
        let mut tagged = Map::new();
        tagged.insert(command, payload);
        Ok(serde_json::from_value(Value::Object(tagged))?)
    }
}

pub fn command_to_bytes(command: &str) -> Result<Vec<u8>> {
    let bytes = command.as_bytes();
    if bytes.len() > COMMAND_LEN {
        return Err(BlockchainError::Network(format!(
            "Command {command} exceeds {COMMAND_LEN} bytes"
        )));
    }
    let mut field = vec![0u8; COMMAND_LEN];
    field[..bytes.len()].copy_from_slice(bytes);
    Ok(field)
}

pub fn bytes_to_command(bytes: &[u8]) -> Result<String> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| BlockchainError::Network(format!("Invalid command field: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_field_is_padded() {
        let frame = Package::GetBlocks {
            addr_from: "127.0.0.1:3000".to_string(),
        }
        .encode()
        .unwrap();

        assert_eq!(&frame[..9], b"getblocks");
        assert_eq!(&frame[9..COMMAND_LEN], &[0, 0, 0]);
        let payload: Value = serde_json::from_slice(&frame[COMMAND_LEN..]).unwrap();
        assert_eq!(payload["addr_from"], "127.0.0.1:3000");
    }

    #[test]
    fn test_frame_roundtrip_keeps_raw_bytes() {
        let pkg = Package::Inv {
            addr_from: "localhost:3001".to_string(),
            op_type: OpType::Block,
            items: vec![vec![0, 0, 255], vec![]],
        };
        let decoded = Package::decode(&pkg.encode().unwrap()).unwrap();
        assert_eq!(decoded, pkg);

        let pkg = Package::Addr {
            addr_list: vec!["a:1".to_string(), "b:2".to_string()],
        };
        assert_eq!(Package::decode(&pkg.encode().unwrap()).unwrap(), pkg);
    }

    #[test]
    fn test_unknown_command() {
        let mut frame = command_to_bytes("ping").unwrap();
        frame.extend(b"{}");
        assert!(matches!(
            Package::decode(&frame),
            Err(BlockchainError::UnknownCommand(cmd)) if cmd == "ping"
        ));
    }

    #[test]
    fn test_malformed_payload() {
        let mut frame = command_to_bytes("version").unwrap();
        frame.extend(b"{\"addr_from\": 7}");
        assert!(Package::decode(&frame).is_err());
        assert!(Package::decode(b"short").is_err());
    }

    #[test]
    fn test_long_command_rejected() {
        assert!(command_to_bytes("averyverylongcommand").is_err());
    }
}

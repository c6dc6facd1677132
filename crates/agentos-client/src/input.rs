use agentos_core::utf8::Utf8Carry;
use agentos_core::SessionRecord;
use std::time::Duration;

/// Ctrl-]: the local command prefix.
pub const PREFIX: u8 = 0x1d;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientInput {
	Keys(String),
	Resized,
	Attach(SessionRecord),
	/// Attach to the session given on the command line, if any.
	AttachConfigured,
	Detach,
	Resumed(Duration),
	Quit,
}

/// Splits raw stdin bytes into keystrokes for the remote side and local
/// commands (`PREFIX` then `q`uit, `d`etach, `a`ttach). A doubled prefix
/// sends the prefix byte itself.
#[derive(Debug, Default)]
pub struct KeyRouter {
	armed: bool,
	// a multi-byte character cut off by the read boundary
	carry: Utf8Carry,
}

impl KeyRouter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn feed(&mut self, bytes: &[u8]) -> Vec<ClientInput> {
		let mut out = Vec::new();
		let mut keys: Vec<u8> = Vec::new();
		for &byte in bytes {
			if self.armed {
				self.armed = false;
				let command = match byte {
					b'q' => Some(ClientInput::Quit),
					b'd' => Some(ClientInput::Detach),
					b'a' => Some(ClientInput::AttachConfigured),
					PREFIX => {
						keys.push(PREFIX);
						None
					}
					other => {
						keys.extend([PREFIX, other]);
						None
					}
				};
				if let Some(command) = command {
					self.flush_keys(&mut keys, &mut out);
					out.push(command);
				}
			} else if byte == PREFIX {
				self.armed = true;
			} else {
				keys.push(byte);
			}
		}
		self.flush_keys(&mut keys, &mut out);
		out
	}

	fn flush_keys(&mut self, keys: &mut Vec<u8>, out: &mut Vec<ClientInput>) {
		if keys.is_empty() {
			return;
		}
		let text = self.carry.push(keys);
		keys.clear();
		if !text.is_empty() {
			out.push(ClientInput::Keys(text));
		}
	}
}

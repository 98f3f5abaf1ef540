//! Counter-mode AES-256 stream generator.
//!
//! State is a 32-byte key and a 128-bit counter split into big-endian high
//! and low halves. Each cipher block is the encryption of the counter after a
//! little-endian-style increment (low half first, carry into the high half on
//! wrap), so equal seeds produce equal byte streams.

use crate::entropy::fill_entropy;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use geotrack_core::{Error, Result};
use parking_lot::Mutex;

/// Exact seed length: 32 key bytes followed by the initial counter, high
/// half first.
pub const SEED_SIZE: usize = 48;

const BLOCK_SIZE: usize = 16;

struct CtrState {
	cipher: Aes256,
	counter_high: u64,
	counter_low: u64,
	block: [u8; BLOCK_SIZE],
	position: usize,
}

impl CtrState {
	/// Increments the counter and re-encrypts it into the block buffer.
	fn advance(&mut self) {
		let (low, carry) = self.counter_low.overflowing_add(1);
		self.counter_low = low;
		if carry {
			self.counter_high = self.counter_high.wrapping_add(1);
		}
		let mut bytes = [0u8; BLOCK_SIZE];
		bytes[0..8].copy_from_slice(&self.counter_high.to_be_bytes());
		bytes[8..16].copy_from_slice(&self.counter_low.to_be_bytes());
		let mut block = GenericArray::clone_from_slice(&bytes);
		self.cipher.encrypt_block(&mut block);
		self.block.copy_from_slice(&block);
		self.position = 0;
	}
}

/// A cryptographically secure pseudo-random byte source. Reads are
/// serialized by an internal mutex; the generator never blocks on i/o.
pub struct Csprng {
	state: Mutex<CtrState>,
}

impl Csprng {
	/// Builds a generator from exactly [`SEED_SIZE`] bytes and primes the
	/// first cipher block.
	pub fn new(seed: &[u8]) -> Result<Csprng> {
		if seed.len() != SEED_SIZE {
			return Err(Error::invalid(format!(
				"seed must be {SEED_SIZE} bytes, got {}",
				seed.len()
			)));
		}
		let cipher =
			Aes256::new_from_slice(&seed[0..32]).map_err(|_| Error::invalid("cipher initialization failed"))?;
		let counter_high = u64::from_be_bytes(seed[32..40].try_into().map_err(|_| Error::invalid("bad seed"))?);
		let counter_low = u64::from_be_bytes(seed[40..48].try_into().map_err(|_| Error::invalid("bad seed"))?);
		let mut state = CtrState {
			cipher,
			counter_high,
			counter_low,
			block: [0u8; BLOCK_SIZE],
			position: 0,
		};
		state.advance();
		Ok(Csprng {
			state: Mutex::new(state),
		})
	}

	/// Builds a generator seeded from the process-global OS entropy source.
	pub fn from_system() -> Result<Csprng> {
		let mut seed = [0u8; SEED_SIZE];
		fill_entropy(&mut seed)?;
		Csprng::new(&seed)
	}

	/// Fills the whole target from the key stream. An empty target is a
	/// no-op that does not advance the state.
	pub fn fill(&self, target: &mut [u8]) -> Result<()> {
		let mut state = self.state.lock();
		for byte in target.iter_mut() {
			if state.position == BLOCK_SIZE {
				state.advance();
			}
			*byte = state.block[state.position];
			state.position += 1;
		}
		Ok(())
	}

	pub fn fill_array<const N: usize>(&self) -> Result<[u8; N]> {
		let mut bytes = [0u8; N];
		self.fill(&mut bytes)?;
		Ok(bytes)
	}

	pub fn next_u64(&self) -> Result<u64> {
		Ok(u64::from_be_bytes(self.fill_array::<8>()?))
	}
}

use byteorder::{ByteOrder, NativeEndian};
use memmap::MmapMut;

use crate::device::error::{IoError, ResourceError};
use crate::{pin_map::PinId, PioResult};
use std::collections::HashSet;
use std::fs::File;
use std::sync::{Mutex, MutexGuard};

/// Mapped GPIO register block plus the set of pins currently handed out.
///
/// All register access goes through the map lock: several pins share one register word, so every
/// read-modify-write has to be serialized.
#[derive(Debug)]
pub struct Memory {
    _file_handle: Option<File>,
    map: Mutex<MmapMut>,
    claims: Mutex<HashSet<PinId>>,
}

impl Memory {
    /// `file_handle` is the device file the map was created from, if any. It is kept open for as long as the map lives.
    pub fn new(file_handle: Option<File>, map: MmapMut) -> Self {
        Self {
            _file_handle: file_handle,
            map: Mutex::new(map),
            claims: Mutex::new(HashSet::with_capacity(PinId::ALL.len())),
        }
    }

    pub fn claim(&self, pin_id: PinId) -> PioResult<()> {
        let mut claims = self.claims.lock().map_err(|_| ResourceError::ClaimsPoisoned)?;

        if claims.insert(pin_id) {
            Ok(())
        } else {
            Err(ResourceError::AlreadyClaimed(pin_id.to_string()).into())
        }
    }

    /// Gives the pin back. Releasing a pin that is not claimed does nothing.
    pub fn release(&self, pin_id: PinId) -> PioResult<()> {
        let mut claims = self.claims.lock().map_err(|_| ResourceError::ClaimsPoisoned)?;
        claims.remove(&pin_id);
        Ok(())
    }

    #[cfg(test)]
    pub fn is_claimed(&self, pin_id: PinId) -> bool {
        self.claims
            .lock()
            .map(|claims| claims.contains(&pin_id))
            .unwrap_or(false)
    }

    fn map(&self) -> PioResult<MutexGuard<'_, MmapMut>> {
        self.map.lock().map_err(|_| IoError::StatePoisoned.into())
    }

    pub fn read_word(&self, offset: usize) -> PioResult<u32> {
        let map = self.map()?;
        Ok(NativeEndian::read_u32(&map[offset..]))
    }

    /// Sets (`true`) or clears (`false`) one bit of the register word at `offset`.
    pub fn write_bit(&self, offset: usize, bit: u8, set: bool) -> PioResult<()> {
        let mut map = self.map()?;
        let word = NativeEndian::read_u32(&map[offset..]);
        let word = if set { word | (1 << bit) } else { word & !(1 << bit) };
        NativeEndian::write_u32(&mut map[offset..], word);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anonymous() -> Memory {
        Memory::new(None, MmapMut::map_anon(4096).unwrap())
    }

    #[test]
    fn claims_are_exclusive() {
        let memory = anonymous();
        memory.claim(PinId::Phy7).unwrap();
        assert!(memory.claim(PinId::Phy7).unwrap_err().is_resource_unavailable());
        memory.claim(PinId::Phy8).unwrap();

        memory.release(PinId::Phy7).unwrap();
        assert!(!memory.is_claimed(PinId::Phy7));
        memory.claim(PinId::Phy7).unwrap();
    }

    #[test]
    fn write_bit_keeps_other_bits() {
        let memory = anonymous();
        memory.write_bit(0x40, 3, true).unwrap();
        memory.write_bit(0x40, 5, true).unwrap();
        memory.write_bit(0x40, 3, false).unwrap();
        assert_eq!(memory.read_word(0x40).unwrap(), 1 << 5);
    }
}

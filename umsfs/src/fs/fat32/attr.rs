// SPDX-License-Identifier: MIT

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Fat32Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
        const LFN       = 0x0F;
    }
}

impl Fat32Attributes {
    /// Long-name slots carry exactly the four low bits.
    #[inline]
    pub fn is_lfn(raw: u8) -> bool {
        raw & 0x3F == Self::LFN.bits()
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    #[inline]
    pub fn is_volume_label(&self) -> bool {
        self.contains(Self::VOLUME_ID) && !self.contains(Self::DIRECTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lfn_attribute_is_exact() {
        assert!(Fat32Attributes::is_lfn(0x0F));
        assert!(Fat32Attributes::is_lfn(0xCF));
        assert!(!Fat32Attributes::is_lfn(0x08));
        assert!(Fat32Attributes::from_bits_truncate(0x08).is_volume_label());
        assert!(Fat32Attributes::from_bits_truncate(0x30).is_dir());
    }
}

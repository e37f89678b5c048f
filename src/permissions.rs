//! Permission flags (spec.md §3). The core treats the `/P` integer opaquely
//! apart from the reserved-bit forcing and sign-extension rules the PDF
//! specification requires; it never interprets individual bits.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct Permissions: u64 {
        /// (R=2) Print the document. (R>=3) Print the document (possibly not
        /// at the highest quality, see [`Permissions::PRINTABLE_IN_HIGH_QUALITY`]).
        const PRINTABLE = 1 << 2;

        /// Modify the contents of the document by operations other than
        /// those controlled by [`Permissions::ANNOTABLE`],
        /// [`Permissions::FILLABLE`] and [`Permissions::ASSEMBLABLE`].
        const MODIFIABLE = 1 << 3;

        /// Copy or otherwise extract text and graphics from the document.
        const COPYABLE = 1 << 4;

        /// Add or modify text annotations, fill in interactive form fields,
        /// and if [`Permissions::MODIFIABLE`] is also set, create or modify
        /// form fields (including signature fields).
        const ANNOTABLE = 1 << 5;

        /// Fill in existing interactive form fields, even if
        /// [`Permissions::ANNOTABLE`] is clear.
        const FILLABLE = 1 << 8;

        /// Extract text and graphics for the purpose of accessibility.
        const COPYABLE_FOR_ACCESSIBILITY = 1 << 9;

        /// (R>=3) Assemble the document, even if [`Permissions::MODIFIABLE`]
        /// is not set.
        const ASSEMBLABLE = 1 << 10;

        /// (R>=3) Print to a representation from which a faithful copy of
        /// the PDF content could be generated.
        const PRINTABLE_IN_HIGH_QUALITY = 1 << 11;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

impl Permissions {
    /// Forces the reserved bits PDF requires to be set and sign-extends the
    /// 32-bit `/P` value to the 64-bit representation this type stores it in.
    pub fn correct_bits(self) -> Self {
        let mut bits = self.bits();

        // Bits 7-8 (1-indexed): reserved, must be 1.
        bits |= 0b11 << 6;

        // Bits 13-32 (1-indexed): reserved, must be 1.
        bits |= 0b1111 << 12 | 0xffff << 16;

        // /P is stored as a signed 32-bit integer; extend to 64 bits by
        // setting the upper 32 bits, matching the sign extension of a
        // negative permission value (the common case: all flags set).
        bits |= 0xffffffff << 32;

        Permissions::from_bits_retain(bits)
    }

    /// Reinterprets the low 32 bits as the signed `/P` integer PDF stores.
    pub fn as_p_value(self) -> i32 {
        self.bits() as u32 as i32
    }

    /// Builds a `Permissions` from the signed `/P` integer read back from an
    /// `/Encrypt` dictionary, sign-extending per [`Permissions::correct_bits`].
    pub fn from_p_value(p: i32) -> Self {
        Permissions::from_bits_retain(p as u32 as u64).correct_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_bits_forces_reserved_bits_and_sign_extends() {
        let permissions = Permissions::empty().correct_bits();
        assert_eq!(permissions.bits() & (0b11 << 6), 0b11 << 6);
        assert_eq!(permissions.bits() >> 32, 0xffffffff);
    }

    #[test]
    fn p_value_round_trips_through_sign_extension() {
        let p: i32 = -44;
        let permissions = Permissions::from_p_value(p);
        assert_eq!(permissions.as_p_value(), p);
    }
}

//! Per-field marshaling metadata.
//!
//! Every method parameter (and the result, when there is one) carries an
//! [`Accessor`]: a field descriptor plus direction/representation flags.
//! The flags are fixed by the interface definition and resolved when the
//! per-interface glue is produced; nothing mutates them at runtime. The
//! proxy bases consult them to decide what goes into a request and what
//! comes back in a response.

use bitflags::bitflags;

bitflags! {
    /// Flags describing how a message field is accessed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldFlags: u8 {
        /// Sent from client to server in the request.
        const IN        = 1 << 0;
        /// Returned from server to client in the response.
        const OUT       = 1 << 1;
        /// May be absent on the wire; decoded as `Option<T>`.
        const OPTIONAL  = 1 << 2;
        /// Computed lazily on the server, only if the caller asked for it.
        const REQUESTED = 1 << 3;
        /// Carried as an owned indirection rather than inline.
        const BOXED     = 1 << 4;
    }
}

/// A named, positioned message field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Field name as declared in the interface.
    pub name: &'static str,
    /// Position in the combined params-then-result field list.
    pub index: u16,
}

impl Field {
    /// Create a new field descriptor.
    pub const fn new(name: &'static str, index: u16) -> Self {
        Self { name, index }
    }
}

/// Accessor holding the flags that determine how to access a message field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accessor {
    /// The field this accessor describes.
    pub field: Field,
    flags: FieldFlags,
}

impl Accessor {
    /// Create a new accessor. Flags compose; `IN.union(OPTIONAL)` is a
    /// client-to-server field that may be absent.
    pub const fn new(field: Field, flags: FieldFlags) -> Self {
        Self { field, flags }
    }

    /// All flags on this accessor.
    pub const fn flags(&self) -> FieldFlags {
        self.flags
    }

    /// Field is written into the outgoing request.
    pub const fn is_in(&self) -> bool {
        self.flags.contains(FieldFlags::IN)
    }

    /// Field is read from the incoming response.
    pub const fn is_out(&self) -> bool {
        self.flags.contains(FieldFlags::OUT)
    }

    /// Absence on the wire is legal for this field.
    pub const fn is_optional(&self) -> bool {
        self.flags.contains(FieldFlags::OPTIONAL)
    }

    /// Field is only evaluated if the request asked for it.
    pub const fn is_requested(&self) -> bool {
        self.flags.contains(FieldFlags::REQUESTED)
    }

    /// Field travels as an owned indirection.
    pub const fn is_boxed(&self) -> bool {
        self.flags.contains(FieldFlags::BOXED)
    }
}

/// Check that a field list is self-consistent: no two accessors may claim
/// the same field index with a different name or different flags.
///
/// Glue code builds these tables statically, so an inconsistent table is a
/// bug in whatever produced it. Method tables assert this in debug builds.
pub fn check_accessors(fields: &[Accessor]) -> bool {
    for (i, a) in fields.iter().enumerate() {
        for b in &fields[i + 1..] {
            if a.field.index == b.field.index && (a.field.name != b.field.name || a.flags != b.flags)
            {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_compose() {
        let a = Accessor::new(
            Field::new("maybe_name", 0),
            FieldFlags::IN.union(FieldFlags::OPTIONAL),
        );
        assert!(a.is_in());
        assert!(a.is_optional());
        assert!(!a.is_out());
        assert!(!a.is_requested());
        assert!(!a.is_boxed());
    }

    #[test]
    fn requested_and_boxed_are_independent() {
        let a = Accessor::new(
            Field::new("detail", 1),
            FieldFlags::OUT.union(FieldFlags::REQUESTED).union(FieldFlags::BOXED),
        );
        assert!(a.is_out());
        assert!(a.is_requested());
        assert!(a.is_boxed());
        assert!(!a.is_in());
    }

    #[test]
    fn check_accessors_accepts_consistent_table() {
        let fields = [
            Accessor::new(Field::new("delta", 0), FieldFlags::IN),
            Accessor::new(Field::new("total", 1), FieldFlags::OUT),
        ];
        assert!(check_accessors(&fields));
    }

    #[test]
    fn check_accessors_rejects_conflicting_flags() {
        let fields = [
            Accessor::new(Field::new("delta", 0), FieldFlags::IN),
            Accessor::new(Field::new("delta", 0), FieldFlags::OUT),
        ];
        assert!(!check_accessors(&fields));
    }

    #[test]
    fn check_accessors_rejects_renamed_index() {
        let fields = [
            Accessor::new(Field::new("delta", 0), FieldFlags::IN),
            Accessor::new(Field::new("count", 0), FieldFlags::IN),
        ];
        assert!(!check_accessors(&fields));
    }
}

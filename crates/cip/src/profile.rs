//! Protocol profile: the runtime-selectable set of wire-format choices that
//! let the harness impersonate strict ODVA devices, permissive legacy
//! targets, or specific vendor dialects.
//!
//! The profile is process-wide and swapped atomically via [`CURRENT`] rather
//! than threaded through every call, but codecs always re-read it at the
//! start of a call and never hold a snapshot across an `.await` point —
//! swapping profiles mid-exchange must not produce a mixed-endian frame.

use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;

use crate::byte::ByteOrder;

/// How a CIP-connection-manager EPATH (inside ForwardOpen/ForwardClose) picks
/// its connection from a ForwardClose request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForwardCloseMode {
    /// Scan the payload for a `0x34` segment marker and treat the following
    /// bytes as a raw connection ID. Pragmatic, not ODVA-faithful, but what
    /// most deployed targets actually expect.
    #[default]
    MarkerScan,
    /// Parse connection serial / originator vendor / originator serial at
    /// their fixed offsets and look the connection up by those fields.
    StrictOffset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoSequenceMode {
    Include,
    Omit,
    Random,
}

#[derive(Debug, Clone, Copy)]
pub struct CpfPolicy {
    pub strict: bool,
    pub allow_missing_items: bool,
    pub allow_extra_items: bool,
    pub allow_reorder: bool,
}

impl Default for CpfPolicy {
    fn default() -> Self {
        Self {
            strict: true,
            allow_missing_items: false,
            allow_extra_items: false,
            allow_reorder: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub require_register_session: bool,
    pub max_sessions: usize,
    pub max_sessions_per_ip: usize,
    pub idle_timeout_ms: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            require_register_session: true,
            max_sessions: 4096,
            max_sessions_per_ip: 256,
            idle_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CipPolicy {
    pub strict_paths: bool,
    pub default_unsupported_status: u8,
    pub allow_rules: Vec<(u16, u8)>,
    pub deny_rules: Vec<(u16, u8)>,
    pub deny_status_overrides: Vec<((u16, u8), u8)>,
    pub forward_close_mode: ForwardCloseMode,
}

impl Default for CipPolicy {
    fn default() -> Self {
        Self {
            strict_paths: true,
            default_unsupported_status: 0x08,
            allow_rules: Vec::new(),
            deny_rules: Vec::new(),
            deny_status_overrides: Vec::new(),
            forward_close_mode: ForwardCloseMode::default(),
        }
    }
}

/// A fully-resolved wire-format profile.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub enip_byte_order: ByteOrder,
    pub cip_byte_order: ByteOrder,
    pub include_cip_path_size: bool,
    pub include_cip_resp_reserved: bool,
    pub use_cpf: bool,
    pub io_sequence_mode: IoSequenceMode,
    pub cpf_policy: CpfPolicy,
    pub session_policy: SessionPolicy,
    pub cip_policy: CipPolicy,
}

impl Profile {
    pub fn strict_odva() -> Self {
        Self {
            name: "strict_odva".into(),
            enip_byte_order: ByteOrder::Little,
            cip_byte_order: ByteOrder::Little,
            include_cip_path_size: true,
            include_cip_resp_reserved: true,
            use_cpf: true,
            io_sequence_mode: IoSequenceMode::Include,
            cpf_policy: CpfPolicy::default(),
            session_policy: SessionPolicy::default(),
            cip_policy: CipPolicy::default(),
        }
    }

    pub fn legacy_compat() -> Self {
        Self {
            name: "legacy_compat".into(),
            enip_byte_order: ByteOrder::Big,
            cip_byte_order: ByteOrder::Big,
            include_cip_path_size: false,
            include_cip_resp_reserved: false,
            use_cpf: false,
            io_sequence_mode: IoSequenceMode::Omit,
            cpf_policy: CpfPolicy {
                strict: false,
                allow_missing_items: true,
                allow_extra_items: true,
                allow_reorder: true,
            },
            session_policy: SessionPolicy::default(),
            cip_policy: CipPolicy {
                strict_paths: false,
                ..CipPolicy::default()
            },
        }
    }

    /// Vendor presets; unknown names fall back to [`Profile::strict_odva`]
    /// with only the documented deviation applied.
    pub fn vendor(name: &str) -> Self {
        match name {
            "rockwell_v32" => {
                let mut p = Self::strict_odva();
                p.name = "rockwell_v32".into();
                p.cip_policy.forward_close_mode = ForwardCloseMode::MarkerScan;
                p
            }
            "schneider_m580" => {
                let mut p = Self::strict_odva();
                p.name = "schneider_m580".into();
                p.include_cip_resp_reserved = false;
                p
            }
            other => {
                let mut p = Self::strict_odva();
                p.name = other.to_string();
                p
            }
        }
    }

    pub fn by_mode(mode: &str) -> Self {
        match mode {
            "legacy_compat" => Self::legacy_compat(),
            "strict_odva" => Self::strict_odva(),
            vendor => Self::vendor(vendor),
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::strict_odva()
    }
}

/// Process-wide current profile. Codecs call [`current`] at the start of
/// every encode/decode; nothing should cache the returned `Arc` across an
/// await point.
static CURRENT: OnceLock<ArcSwap<Profile>> = OnceLock::new();

fn cell() -> &'static ArcSwap<Profile> {
    CURRENT.get_or_init(|| ArcSwap::from_pointee(Profile::default()))
}

/// Snapshot the current profile.
pub fn current() -> Arc<Profile> {
    cell().load_full()
}

/// Atomically replace the process-wide profile.
pub fn set_current(profile: Profile) {
    cell().store(Arc::new(profile));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_odva_is_little_endian_both_layers() {
        let p = Profile::strict_odva();
        assert_eq!(p.enip_byte_order, ByteOrder::Little);
        assert_eq!(p.cip_byte_order, ByteOrder::Little);
        assert!(p.use_cpf);
    }

    #[test]
    fn legacy_compat_is_big_endian_no_cpf() {
        let p = Profile::legacy_compat();
        assert_eq!(p.enip_byte_order, ByteOrder::Big);
        assert!(!p.use_cpf);
        assert!(p.cpf_policy.allow_missing_items);
    }

    #[test]
    fn unknown_vendor_falls_back_to_strict_defaults() {
        let p = Profile::vendor("acme_widgets");
        assert_eq!(p.enip_byte_order, ByteOrder::Little);
        assert_eq!(p.name, "acme_widgets");
    }

    #[test]
    fn current_profile_swap_is_visible_immediately() {
        set_current(Profile::legacy_compat());
        assert_eq!(current().name, "legacy_compat");
        set_current(Profile::strict_odva());
        assert_eq!(current().name, "strict_odva");
    }
}

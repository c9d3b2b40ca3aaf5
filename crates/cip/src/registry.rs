//! Service registry: validation metadata for `(class, service)` pairs, with
//! the generic (class 0) fallback used by services common to every object.

use std::collections::HashMap;

/// A structural rule checked against a request beyond the basic
/// service/path shape (e.g. "UnconnectedSend must carry a route path").
#[derive(Debug, Clone)]
pub enum Rule {
    RequiresNonEmptyPayload,
    MinPayloadLen(usize),
}

#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub class_id: u16,
    pub service: u8,
    pub name: &'static str,
    pub requires_instance: bool,
    pub requires_attribute: bool,
    pub min_request_len: usize,
    pub min_response_len: usize,
    pub strict_rules: Vec<Rule>,
}

/// Maps `(class, service)` to its registered entry, falling back to the
/// `(0, service)` generic-object entry when no class-specific row exists.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: HashMap<(u16, u8), ServiceEntry>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn register(&mut self, entry: ServiceEntry) {
        self.entries.insert((entry.class_id, entry.service), entry);
    }

    pub fn lookup(&self, class: u16, service: u8) -> Option<&ServiceEntry> {
        self.entries
            .get(&(class, service))
            .or_else(|| self.entries.get(&(0, service)))
    }

    /// Preloaded with the generic CIP services plus the class-specific
    /// entries this harness actually implements.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        use crate::cip::service::*;

        for (service, name) in [
            (GET_ATTRIBUTE_ALL, "Get_Attribute_All"),
            (SET_ATTRIBUTE_ALL, "Set_Attribute_All"),
            (GET_ATTRIBUTE_LIST, "Get_Attribute_List"),
            (SET_ATTRIBUTE_LIST, "Set_Attribute_List"),
            (RESET, "Reset"),
            (GET_ATTRIBUTE_SINGLE, "Get_Attribute_Single"),
            (SET_ATTRIBUTE_SINGLE, "Set_Attribute_Single"),
        ] {
            reg.register(ServiceEntry {
                class_id: 0,
                service,
                name,
                requires_instance: true,
                requires_attribute: service == GET_ATTRIBUTE_SINGLE || service == SET_ATTRIBUTE_SINGLE,
                min_request_len: 0,
                min_response_len: 0,
                strict_rules: Vec::new(),
            });
        }

        // Connection Manager, class 0x06.
        reg.register(ServiceEntry {
            class_id: 0x06,
            service: FORWARD_OPEN,
            name: "Forward_Open",
            requires_instance: true,
            requires_attribute: false,
            min_request_len: 28,
            min_response_len: 0,
            strict_rules: vec![Rule::MinPayloadLen(28)],
        });
        reg.register(ServiceEntry {
            class_id: 0x06,
            service: FORWARD_CLOSE,
            name: "Forward_Close",
            requires_instance: true,
            requires_attribute: false,
            min_request_len: 8,
            min_response_len: 0,
            strict_rules: Vec::new(),
        });
        reg.register(ServiceEntry {
            class_id: 0x06,
            service: UNCONNECTED_SEND,
            name: "Unconnected_Send",
            requires_instance: true,
            requires_attribute: false,
            min_request_len: 4,
            min_response_len: 0,
            strict_rules: vec![Rule::RequiresNonEmptyPayload],
        });

        // Message Router (MultipleService), class 0x02.
        reg.register(ServiceEntry {
            class_id: 0x02,
            service: MULTIPLE_SERVICE,
            name: "Multiple_Service_Packet",
            requires_instance: true,
            requires_attribute: false,
            min_request_len: 2,
            min_response_len: 0,
            strict_rules: Vec::new(),
        });

        // Symbol Object tag access, class 0x6B (Logix-like symbolic tags).
        for (service, name) in [
            (READ_TAG, "Read_Tag"),
            (WRITE_TAG, "Write_Tag"),
            (READ_TAG_FRAGMENTED, "Read_Tag_Fragmented"),
            (WRITE_TAG_FRAGMENTED, "Write_Tag_Fragmented"),
        ] {
            reg.register(ServiceEntry {
                class_id: 0x6B,
                service,
                name,
                requires_instance: false,
                requires_attribute: false,
                min_request_len: 0,
                min_response_len: 0,
                strict_rules: Vec::new(),
            });
        }

        // PCCC Object, class 0x67.
        reg.register(ServiceEntry {
            class_id: 0x67,
            service: PCCC_EXECUTE,
            name: "PCCC_Execute",
            requires_instance: true,
            requires_attribute: false,
            min_request_len: 7,
            min_response_len: 0,
            strict_rules: Vec::new(),
        });

        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cip::service::GET_ATTRIBUTE_SINGLE;

    #[test]
    fn exact_match_preferred_over_generic_fallback() {
        let mut reg = ServiceRegistry::new();
        reg.register(ServiceEntry {
            class_id: 0,
            service: GET_ATTRIBUTE_SINGLE,
            name: "generic",
            requires_instance: true,
            requires_attribute: true,
            min_request_len: 0,
            min_response_len: 0,
            strict_rules: Vec::new(),
        });
        reg.register(ServiceEntry {
            class_id: 0x01,
            service: GET_ATTRIBUTE_SINGLE,
            name: "identity-specific",
            requires_instance: true,
            requires_attribute: true,
            min_request_len: 0,
            min_response_len: 0,
            strict_rules: Vec::new(),
        });
        let entry = reg.lookup(0x01, GET_ATTRIBUTE_SINGLE).unwrap();
        assert_eq!(entry.name, "identity-specific");
    }

    #[test]
    fn falls_back_to_generic_entry() {
        let reg = ServiceRegistry::with_defaults();
        let entry = reg.lookup(0x99, GET_ATTRIBUTE_SINGLE).unwrap();
        assert_eq!(entry.name, "Get_Attribute_Single");
    }

    #[test]
    fn unknown_pair_is_none() {
        let reg = ServiceRegistry::with_defaults();
        assert!(reg.lookup(0x99, 0xFF).is_none());
    }
}

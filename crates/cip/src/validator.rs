//! Structural and policy validation of decoded frames and CIP requests,
//! keyed off the active [`Profile`] and [`ServiceRegistry`].

use crate::cip::Request;
use crate::enip::{command, Encapsulation};
use crate::error::{Error, Result};
use crate::profile::Profile;
use crate::registry::{Rule, ServiceRegistry};

/// Validate an ENIP header: known command, session-id semantics.
pub fn validate_header(profile: &Profile, encap: &Encapsulation) -> Result<()> {
    if !command::is_known(encap.command) {
        if profile.cpf_policy.strict {
            return Err(Error::Framing(format!(
                "unsupported command 0x{:04X}",
                encap.command
            )));
        }
        return Ok(());
    }
    let session_must_be_zero = matches!(
        encap.command,
        command::LIST_IDENTITY | command::LIST_SERVICES | command::LIST_INTERFACES
    ) || encap.command == command::REGISTER_SESSION;
    if session_must_be_zero && encap.session_id != 0 {
        if profile.cpf_policy.strict {
            return Err(Error::Validation(format!(
                "command 0x{:04X} must carry session_id 0",
                encap.command
            )));
        }
    } else if !session_must_be_zero
        && encap.command != command::REGISTER_SESSION
        && encap.session_id == 0
        && profile.session_policy.require_register_session
        && profile.cpf_policy.strict
    {
        return Err(Error::Validation(format!(
            "command 0x{:04X} requires a nonzero session_id",
            encap.command
        )));
    }
    Ok(())
}

/// Validate a decoded CIP request against the service registry and the
/// profile's CIP policy (allow/deny rules, strict-path requirement).
pub fn validate_request(profile: &Profile, registry: &ServiceRegistry, req: &Request) -> Result<()> {
    let class = req.path.class.unwrap_or(0);

    if profile
        .cip_policy
        .deny_rules
        .iter()
        .any(|&(c, s)| c == class && s == req.service)
    {
        return Err(Error::Validation(format!(
            "service 0x{:02X} on class 0x{:04X} denied by policy",
            req.service, class
        )));
    }

    if profile.cip_policy.strict_paths
        && req.raw_path.is_none()
        && req.path.class.is_none()
        && req.path.name.is_none()
    {
        return Err(Error::Validation(
            "request has neither a class/instance path nor a symbolic path".into(),
        ));
    }

    let Some(entry) = registry.lookup(class, req.service) else {
        return Ok(()); // unknown service: dispatch will report service-not-supported
    };

    if entry.requires_instance && req.path.instance.is_none() && req.path.name.is_none() {
        return Err(Error::Validation(format!(
            "{} requires an instance segment",
            entry.name
        )));
    }
    if entry.requires_attribute && req.path.attribute.is_none() {
        return Err(Error::Validation(format!(
            "{} requires an attribute segment",
            entry.name
        )));
    }
    for rule in &entry.strict_rules {
        match rule {
            Rule::RequiresNonEmptyPayload if req.payload.is_empty() => {
                return Err(Error::Validation(format!(
                    "{} requires a non-empty payload",
                    entry.name
                )));
            }
            Rule::MinPayloadLen(min) if req.payload.len() < *min => {
                return Err(Error::Validation(format!(
                    "{} requires at least {min} payload bytes, got {}",
                    entry.name,
                    req.payload.len()
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cip::service::UNCONNECTED_SEND;
    use crate::epath::LogicalPath;

    #[test]
    fn unconnected_send_with_empty_payload_is_rejected() {
        let profile = Profile::strict_odva();
        let registry = ServiceRegistry::with_defaults();
        let req = Request::new(
            UNCONNECTED_SEND,
            LogicalPath::class_instance(0x06, 1),
            Vec::new(),
        );
        assert!(validate_request(&profile, &registry, &req).is_err());
    }

    #[test]
    fn legacy_compat_allows_missing_strict_path() {
        let profile = Profile::legacy_compat();
        let registry = ServiceRegistry::with_defaults();
        let req = Request {
            service: 0x0E,
            path: LogicalPath::default(),
            raw_path: None,
            payload: Vec::new(),
        };
        assert!(validate_request(&profile, &registry, &req).is_ok());
    }

    #[test]
    fn strict_profile_rejects_missing_path() {
        let profile = Profile::strict_odva();
        let registry = ServiceRegistry::with_defaults();
        let req = Request {
            service: 0x0E,
            path: LogicalPath::default(),
            raw_path: None,
            payload: Vec::new(),
        };
        assert!(validate_request(&profile, &registry, &req).is_err());
    }

    #[test]
    fn list_identity_request_must_carry_zero_session() {
        let profile = Profile::strict_odva();
        let encap = Encapsulation::request(command::LIST_IDENTITY, 5, Vec::new());
        assert!(validate_header(&profile, &encap).is_err());
    }
}

//! Generic attribute-store object, used for any class not covered by a more
//! specific personality. Registered as the full wildcard so specific
//! personalities (identity, adapter, logix, ...) always get first refusal.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::byte::ByteOrder;
use crate::cip::{service, status, Request, Response};
use crate::error::Result;
use crate::handler::Handler;

#[derive(Default)]
pub struct GenericHandler {
    store: Mutex<HashMap<(u16, u16, u16), Vec<u8>>>,
}

impl GenericHandler {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(req: &Request) -> (u16, u16, u16) {
        (
            req.path.class.unwrap_or(0),
            req.path.instance.unwrap_or(0),
            req.path.attribute.unwrap_or(0),
        )
    }
}

impl Handler for GenericHandler {
    fn handle(&self, req: &Request) -> Result<(Response, bool)> {
        let class = req.path.class.unwrap_or(0);
        let instance = req.path.instance.unwrap_or(0);
        let mut store = self.store.lock().unwrap();

        match req.service {
            service::GET_ATTRIBUTE_SINGLE => {
                let value = store.get(&Self::key(req)).cloned().unwrap_or_else(|| vec![0x00]);
                Ok((Response::ok(req.service, value), true))
            }
            service::SET_ATTRIBUTE_SINGLE => {
                store.insert(Self::key(req), req.payload.clone());
                Ok((Response::ok(req.service, Vec::new()), true))
            }
            service::GET_ATTRIBUTE_ALL => {
                let mut attrs: Vec<_> = store
                    .iter()
                    .filter(|((c, i, _), _)| *c == class && *i == instance)
                    .collect();
                attrs.sort_by_key(|((_, _, a), _)| *a);
                let payload = attrs.into_iter().flat_map(|(_, v)| v.clone()).collect();
                Ok((Response::ok(req.service, payload), true))
            }
            service::GET_ATTRIBUTE_LIST => {
                if req.payload.len() < 2 {
                    return Ok((Response::error(req.service, status::SERVICE_NOT_SUPPORTED), true));
                }
                let count = ByteOrder::Little.get_u16(&req.payload).unwrap_or(0) as usize;
                let mut out = Vec::new();
                out.extend_from_slice(&(count as u16).to_le_bytes());
                for i in 0..count {
                    let pos = 2 + i * 2;
                    let Some(bytes) = req.payload.get(pos..pos + 2) else {
                        break;
                    };
                    let attr_id = ByteOrder::Little.get_u16(bytes).unwrap_or(0);
                    out.extend_from_slice(&attr_id.to_le_bytes());
                    match store.get(&(class, instance, attr_id)) {
                        Some(value) => {
                            out.push(status::SUCCESS);
                            out.extend_from_slice(value);
                        }
                        None => out.push(status::ATTRIBUTE_NOT_FOUND),
                    }
                }
                Ok((Response::ok(req.service, out), true))
            }
            service::RESET => {
                store.retain(|(c, i, _), _| !(*c == class && *i == instance));
                Ok((Response::ok(req.service, Vec::new()), true))
            }
            _ => Ok((Response::error(req.service, status::SERVICE_NOT_SUPPORTED), false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epath::LogicalPath;

    fn req(service: u8, class: u16, instance: u16, attribute: u16, payload: Vec<u8>) -> Request {
        Request::new(
            service,
            LogicalPath::class_instance_attribute(class, instance, attribute),
            payload,
        )
    }

    #[test]
    fn set_then_get_round_trips() {
        let handler = GenericHandler::new();
        handler
            .handle(&req(service::SET_ATTRIBUTE_SINGLE, 0x30, 1, 5, vec![1, 2, 3]))
            .unwrap();
        let (resp, _) = handler.handle(&req(service::GET_ATTRIBUTE_SINGLE, 0x30, 1, 5, vec![])).unwrap();
        assert_eq!(resp.payload, vec![1, 2, 3]);
    }

    #[test]
    fn default_attribute_is_single_zero_byte() {
        let handler = GenericHandler::new();
        let (resp, _) = handler.handle(&req(service::GET_ATTRIBUTE_SINGLE, 0x30, 1, 9, vec![])).unwrap();
        assert_eq!(resp.payload, vec![0x00]);
    }

    #[test]
    fn get_attribute_list_reports_missing_attribute() {
        let handler = GenericHandler::new();
        handler
            .handle(&req(service::SET_ATTRIBUTE_SINGLE, 0x30, 1, 1, vec![9]))
            .unwrap();
        let mut payload = vec![2, 0]; // count = 2
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&2u16.to_le_bytes());
        let (resp, _) = handler
            .handle(&req(service::GET_ATTRIBUTE_LIST, 0x30, 1, 0, payload))
            .unwrap();
        assert_eq!(resp.payload, vec![2, 0, 1, 0, 0x00, 9, 2, 0, status::ATTRIBUTE_NOT_FOUND]);
    }

    #[test]
    fn reset_clears_only_that_instance() {
        let handler = GenericHandler::new();
        handler
            .handle(&req(service::SET_ATTRIBUTE_SINGLE, 0x30, 1, 1, vec![1]))
            .unwrap();
        handler
            .handle(&req(service::SET_ATTRIBUTE_SINGLE, 0x30, 2, 1, vec![2]))
            .unwrap();
        handler.handle(&req(service::RESET, 0x30, 1, 0, vec![])).unwrap();
        let (resp, _) = handler.handle(&req(service::GET_ATTRIBUTE_SINGLE, 0x30, 1, 1, vec![])).unwrap();
        assert_eq!(resp.payload, vec![0x00]);
        let (resp, _) = handler.handle(&req(service::GET_ATTRIBUTE_SINGLE, 0x30, 2, 1, vec![])).unwrap();
        assert_eq!(resp.payload, vec![2]);
    }
}

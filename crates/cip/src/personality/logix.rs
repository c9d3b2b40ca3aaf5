//! Logix-like tag server: symbolic Read_Tag/Write_Tag and their fragmented
//! variants, addressed by tag name rather than class/instance/attribute.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::byte::ByteOrder;
use crate::cip::{service, status, Request, Response};
use crate::error::Result;
use crate::handler::Handler;

#[derive(Debug, Clone)]
pub struct Tag {
    pub name: String,
    pub type_code: u16,
    pub data: Vec<u8>,
}

#[derive(Default)]
pub struct LogixHandler {
    tags: Mutex<HashMap<String, Tag>>,
}

impl LogixHandler {
    pub fn new(tags: Vec<Tag>) -> Self {
        Self {
            tags: Mutex::new(tags.into_iter().map(|t| (t.name.clone(), t)).collect()),
        }
    }
}

impl Handler for LogixHandler {
    fn handle(&self, req: &Request) -> Result<(Response, bool)> {
        let Some(name) = req.path.name.clone() else {
            return Ok((Response::error(req.service, status::PATH_DESTINATION_UNKNOWN), false));
        };
        let mut tags = self.tags.lock().unwrap();

        match req.service {
            service::READ_TAG => match tags.get(&name) {
                Some(tag) => {
                    let mut payload = tag.type_code.to_le_bytes().to_vec();
                    payload.extend_from_slice(&tag.data);
                    Ok((Response::ok(req.service, payload), true))
                }
                None => Ok((Response::error(req.service, status::PATH_DESTINATION_UNKNOWN), true)),
            },
            service::WRITE_TAG => match tags.get_mut(&name) {
                Some(tag) => {
                    if req.payload.len() < 2 {
                        return Ok((Response::error(req.service, status::INVALID_EMBEDDED), true));
                    }
                    tag.type_code = ByteOrder::Little.get_u16(&req.payload)?;
                    tag.data = req.payload[2..].to_vec();
                    Ok((Response::ok(req.service, Vec::new()), true))
                }
                None => Ok((Response::error(req.service, status::PATH_DESTINATION_UNKNOWN), true)),
            },
            service::READ_TAG_FRAGMENTED => match tags.get(&name) {
                Some(tag) => {
                    if req.payload.len() < 6 {
                        return Ok((Response::error(req.service, status::INVALID_EMBEDDED), true));
                    }
                    let offset = ByteOrder::Little.get_u32(&req.payload[2..6])? as usize;
                    let chunk = tag.data.get(offset..).unwrap_or(&[]).to_vec();
                    let mut payload = tag.type_code.to_le_bytes().to_vec();
                    payload.extend_from_slice(&chunk);
                    Ok((Response::ok(req.service, payload), true))
                }
                None => Ok((Response::error(req.service, status::PATH_DESTINATION_UNKNOWN), true)),
            },
            _ => Ok((Response::error(req.service, status::SERVICE_NOT_SUPPORTED), false)),
        }
    }
}

//! Identity object, class 0x01 instance 1.

use crate::cip::{service, status, Request, Response};
use crate::error::Result;
use crate::handler::Handler;

#[derive(Debug, Clone)]
pub struct IdentityObject {
    pub vendor_id: u16,
    pub device_type: u16,
    pub product_code: u16,
    pub revision_major: u8,
    pub revision_minor: u8,
    pub status: u16,
    pub serial: u32,
    pub product_name: String,
}

impl Default for IdentityObject {
    fn default() -> Self {
        Self {
            vendor_id: 0x0001,
            device_type: 0x000C,
            product_code: 0x0001,
            revision_major: 1,
            revision_minor: 0,
            status: 0,
            serial: 0x0000_0001,
            product_name: "CIP Test Harness".into(),
        }
    }
}

impl IdentityObject {
    fn attribute(&self, attr: u16) -> Option<Vec<u8>> {
        match attr {
            1 => Some(self.vendor_id.to_le_bytes().to_vec()),
            2 => Some(self.device_type.to_le_bytes().to_vec()),
            3 => Some(self.product_code.to_le_bytes().to_vec()),
            4 => Some(vec![self.revision_major, self.revision_minor]),
            5 => Some(self.status.to_le_bytes().to_vec()),
            6 => Some(self.serial.to_le_bytes().to_vec()),
            7 => {
                let mut out = vec![self.product_name.len() as u8];
                out.extend_from_slice(self.product_name.as_bytes());
                Some(out)
            }
            _ => None,
        }
    }

    fn get_all(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for attr in 1..=7 {
            out.extend_from_slice(&self.attribute(attr).unwrap());
        }
        out
    }
}

pub struct IdentityHandler {
    pub object: IdentityObject,
}

impl Handler for IdentityHandler {
    fn handle(&self, req: &Request) -> Result<(Response, bool)> {
        let instance = req.path.instance.unwrap_or(0);
        if instance != 1 {
            return Ok((Response::error(req.service, status::PATH_DESTINATION_UNKNOWN), true));
        }
        match req.service {
            service::GET_ATTRIBUTE_SINGLE => {
                let attr = req.path.attribute.unwrap_or(0);
                match self.object.attribute(attr) {
                    Some(bytes) => Ok((Response::ok(req.service, bytes), true)),
                    None => Ok((Response::error(req.service, status::ATTRIBUTE_NOT_FOUND), true)),
                }
            }
            service::GET_ATTRIBUTE_ALL => Ok((Response::ok(req.service, self.object.get_all()), true)),
            _ => Ok((Response::error(req.service, status::SERVICE_NOT_SUPPORTED), false)),
        }
    }
}

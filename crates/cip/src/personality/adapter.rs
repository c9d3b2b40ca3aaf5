//! Adapter personality: configured assemblies of I/O bytes, each with an
//! update pattern applied when the data is read more than 100ms after its
//! last refresh.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::cip::{service, status, Request, Response};
use crate::error::Result;
use crate::handler::Handler;
use crate::rng::DeterministicRng;

const STALE_AFTER: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePattern {
    Counter,
    Random,
    Static,
    ReflectInputs,
}

pub struct Assembly {
    pub name: String,
    pub class: u16,
    pub instance: u16,
    pub attribute: u16,
    pub writable: bool,
    pub pattern: UpdatePattern,
    data: Mutex<Vec<u8>>,
    last_update: Mutex<Instant>,
}

impl Assembly {
    pub fn new(
        name: impl Into<String>,
        class: u16,
        instance: u16,
        attribute: u16,
        size: usize,
        writable: bool,
        pattern: UpdatePattern,
    ) -> Self {
        Self {
            name: name.into(),
            class,
            instance,
            attribute,
            writable,
            pattern,
            data: Mutex::new(vec![0u8; size]),
            last_update: Mutex::new(Instant::now() - STALE_AFTER - Duration::from_millis(1)),
        }
    }

    fn matches(&self, req: &Request) -> bool {
        req.path.class.unwrap_or(0) == self.class
            && req.path.instance.unwrap_or(0) == self.instance
            && (req.path.attribute.is_none() || req.path.attribute == Some(self.attribute))
    }

    fn refresh_if_stale(&self, rng: &Mutex<DeterministicRng>) {
        let mut last = self.last_update.lock().unwrap();
        if last.elapsed() < STALE_AFTER {
            return;
        }
        *last = Instant::now();
        let mut data = self.data.lock().unwrap();
        match self.pattern {
            UpdatePattern::Counter => {
                if data.len() >= 4 {
                    let n = u32::from_le_bytes([data[0], data[1], data[2], data[3]]).wrapping_add(1);
                    data[0..4].copy_from_slice(&n.to_le_bytes());
                }
            }
            UpdatePattern::Random => {
                let mut rng = rng.lock().unwrap();
                rng.fill_bytes(&mut data);
            }
            UpdatePattern::Static | UpdatePattern::ReflectInputs => {}
        }
    }
}

pub struct AssemblyHandler {
    assemblies: Vec<Assembly>,
    rng: Mutex<DeterministicRng>,
}

impl AssemblyHandler {
    pub fn new(assemblies: Vec<Assembly>, seed: u64) -> Self {
        Self {
            assemblies,
            rng: Mutex::new(DeterministicRng::new(seed)),
        }
    }

    fn find(&self, req: &Request) -> Option<&Assembly> {
        self.assemblies.iter().find(|a| a.matches(req))
    }
}

impl Handler for AssemblyHandler {
    fn handle(&self, req: &Request) -> Result<(Response, bool)> {
        let Some(assembly) = self.find(req) else {
            return Ok((Response::error(req.service, status::SERVICE_NOT_SUPPORTED), false));
        };
        match req.service {
            service::GET_ATTRIBUTE_SINGLE => {
                assembly.refresh_if_stale(&self.rng);
                let data = assembly.data.lock().unwrap().clone();
                Ok((Response::ok(req.service, data), true))
            }
            service::SET_ATTRIBUTE_SINGLE => {
                if !assembly.writable {
                    return Ok((Response::error(req.service, status::ATTRIBUTE_NOT_SETTABLE), true));
                }
                let mut data = assembly.data.lock().unwrap();
                let len = data.len().min(req.payload.len());
                data[..len].copy_from_slice(&req.payload[..len]);
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

    fn req(service: u8, payload: Vec<u8>) -> Request {
        Request::new(service, LogicalPath::class_instance(0x04, 0x65), payload)
    }

    #[test]
    fn counter_pattern_increments_on_stale_read() {
        let handler = AssemblyHandler::new(
            vec![Assembly::new("out", 0x04, 0x65, 3, 4, false, UpdatePattern::Counter)],
            1,
        );
        let (first, _) = handler.handle(&req(service::GET_ATTRIBUTE_SINGLE, vec![])).unwrap();
        std::thread::sleep(STALE_AFTER + Duration::from_millis(5));
        let (second, _) = handler.handle(&req(service::GET_ATTRIBUTE_SINGLE, vec![])).unwrap();
        assert_ne!(first.payload, second.payload);
    }

    #[test]
    fn write_to_non_writable_assembly_is_rejected() {
        let handler = AssemblyHandler::new(
            vec![Assembly::new("out", 0x04, 0x65, 3, 4, false, UpdatePattern::Static)],
            1,
        );
        let (resp, _) = handler
            .handle(&req(service::SET_ATTRIBUTE_SINGLE, vec![1, 2, 3, 4]))
            .unwrap();
        assert_eq!(resp.status, status::ATTRIBUTE_NOT_SETTABLE);
    }

    #[test]
    fn write_to_writable_assembly_updates_data() {
        let handler = AssemblyHandler::new(
            vec![Assembly::new("in", 0x04, 0x66, 3, 4, true, UpdatePattern::ReflectInputs)],
            1,
        );
        let req_obj = Request::new(
            service::SET_ATTRIBUTE_SINGLE,
            LogicalPath::class_instance(0x04, 0x66),
            vec![9, 9, 9, 9],
        );
        handler.handle(&req_obj).unwrap();
        let (resp, _) = handler
            .handle(&Request::new(
                service::GET_ATTRIBUTE_SINGLE,
                LogicalPath::class_instance(0x04, 0x66),
                vec![],
            ))
            .unwrap();
        assert_eq!(resp.payload, vec![9, 9, 9, 9]);
    }
}

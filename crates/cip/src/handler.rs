//! Three-tier CIP service handler registry.
//!
//! Handlers are tried most specific to least: an exact `(class, service)`
//! match, then a per-class wildcard `(class, *)`, then the full wildcard
//! `(*, *)`. Each handler returns `(response, handled)`; when `handled` is
//! false the next tier is tried. If nothing handles the request, the
//! dispatcher synthesizes a service-not-supported response.

use std::collections::HashMap;

use crate::cip::{self, Request, Response};
use crate::error::Result;

pub trait Handler: Send + Sync {
    fn handle(&self, req: &Request) -> Result<(Response, bool)>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    exact: HashMap<(u16, u8), Box<dyn Handler>>,
    class_wildcard: HashMap<u16, Box<dyn Handler>>,
    full_wildcard: Vec<Box<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_exact(&mut self, class: u16, service: u8, handler: Box<dyn Handler>) {
        self.exact.insert((class, service), handler);
    }

    pub fn register_class(&mut self, class: u16, handler: Box<dyn Handler>) {
        self.class_wildcard.insert(class, handler);
    }

    pub fn register_wildcard(&mut self, handler: Box<dyn Handler>) {
        self.full_wildcard.push(handler);
    }

    pub fn dispatch(&self, default_unsupported_status: u8, req: &Request) -> Result<Response> {
        let class = req.path.class.unwrap_or(0);

        if let Some(h) = self.exact.get(&(class, req.service)) {
            let (resp, handled) = h.handle(req)?;
            if handled {
                return Ok(resp);
            }
        }
        if let Some(h) = self.class_wildcard.get(&class) {
            let (resp, handled) = h.handle(req)?;
            if handled {
                return Ok(resp);
            }
        }
        for h in &self.full_wildcard {
            let (resp, handled) = h.handle(req)?;
            if handled {
                return Ok(resp);
            }
        }
        Ok(Response::error(req.service, default_unsupported_status))
    }
}

/// A handler built from a plain closure, for simple exact-match cases that
/// don't need their own struct and `impl Handler`.
pub struct FnHandler<F>(pub F)
where
    F: Fn(&Request) -> Result<(Response, bool)> + Send + Sync;

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request) -> Result<(Response, bool)> + Send + Sync,
{
    fn handle(&self, req: &Request) -> Result<(Response, bool)> {
        (self.0)(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epath::LogicalPath;

    fn req(class: u16, service: u8) -> Request {
        Request::new(service, LogicalPath::class_instance(class, 1), Vec::new())
    }

    #[test]
    fn exact_match_runs_before_wildcards() {
        let mut reg = HandlerRegistry::new();
        reg.register_exact(
            0x01,
            0x0E,
            Box::new(FnHandler(|r| Ok((Response::ok(r.service, vec![1]), true)))),
        );
        reg.register_class(
            0x01,
            Box::new(FnHandler(|r| Ok((Response::ok(r.service, vec![2]), true)))),
        );
        reg.register_wildcard(Box::new(FnHandler(|r| {
            Ok((Response::ok(r.service, vec![3]), true))
        })));
        let resp = reg.dispatch(0x08, &req(0x01, 0x0E)).unwrap();
        assert_eq!(resp.payload, vec![1]);
    }

    #[test]
    fn falls_through_to_class_wildcard_when_exact_declines() {
        let mut reg = HandlerRegistry::new();
        reg.register_exact(
            0x01,
            0x0E,
            Box::new(FnHandler(|r| Ok((Response::error(r.service, 0), false)))),
        );
        reg.register_class(
            0x01,
            Box::new(FnHandler(|r| Ok((Response::ok(r.service, vec![2]), true)))),
        );
        let resp = reg.dispatch(0x08, &req(0x01, 0x0E)).unwrap();
        assert_eq!(resp.payload, vec![2]);
    }

    #[test]
    fn falls_through_to_full_wildcard_when_both_decline() {
        let mut reg = HandlerRegistry::new();
        reg.register_exact(
            0x01,
            0x0E,
            Box::new(FnHandler(|r| Ok((Response::error(r.service, 0), false)))),
        );
        reg.register_class(
            0x01,
            Box::new(FnHandler(|r| Ok((Response::error(r.service, 0), false)))),
        );
        reg.register_wildcard(Box::new(FnHandler(|r| {
            Ok((Response::ok(r.service, vec![3]), true))
        })));
        let resp = reg.dispatch(0x08, &req(0x01, 0x0E)).unwrap();
        assert_eq!(resp.payload, vec![3]);
    }

    #[test]
    fn unhandled_request_gets_service_not_supported() {
        let reg = HandlerRegistry::new();
        let resp = reg
            .dispatch(cip::status::SERVICE_NOT_SUPPORTED, &req(0x99, 0xFF))
            .unwrap();
        assert_eq!(resp.status, cip::status::SERVICE_NOT_SUPPORTED);
    }
}

//! Modbus-CIP tunnel: class 0x44 carries a raw Modbus PDU in the request
//! payload and returns the Modbus response PDU as the CIP response payload.

use std::sync::Mutex;

use crate::byte::ByteOrder;
use crate::cip::{service, status, Request, Response};
use crate::error::Result;
use crate::handler::Handler;

mod modbus_fn {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
}

const ILLEGAL_DATA_ADDRESS: u8 = 0x02;
const ILLEGAL_FUNCTION: u8 = 0x01;

struct DataStore {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
}

impl DataStore {
    fn new(coils: usize, discrete_inputs: usize, holding: usize, input: usize) -> Self {
        Self {
            coils: vec![false; coils],
            discrete_inputs: vec![false; discrete_inputs],
            holding_registers: vec![0; holding],
            input_registers: vec![0; input],
        }
    }
}

pub struct ModbusHandler {
    store: Mutex<DataStore>,
}

impl ModbusHandler {
    pub fn new(coils: usize, discrete_inputs: usize, holding_registers: usize, input_registers: usize) -> Self {
        Self {
            store: Mutex::new(DataStore::new(coils, discrete_inputs, holding_registers, input_registers)),
        }
    }

    fn exception(function: u8, code: u8) -> Vec<u8> {
        vec![function | 0x80, code]
    }
}

fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let byte_count = bits.len().div_ceil(8);
    let mut out = vec![0u8; byte_count];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    out
}

impl Handler for ModbusHandler {
    fn handle(&self, req: &Request) -> Result<(Response, bool)> {
        let path_class = req.path.class.unwrap_or(0);
        if path_class != 0x44 || req.service != service::GET_ATTRIBUTE_SINGLE {
            return Ok((Response::error(req.service, status::SERVICE_NOT_SUPPORTED), false));
        }
        let Some(&function) = req.payload.first() else {
            return Ok((Response::ok(req.service, Self::exception(0, ILLEGAL_FUNCTION)), true));
        };
        let body = &req.payload[1..];
        let mut store = self.store.lock().unwrap();

        let pdu = match function {
            modbus_fn::READ_COILS | modbus_fn::READ_DISCRETE_INPUTS => {
                read_bits(function, body, if function == modbus_fn::READ_COILS {
                    &store.coils
                } else {
                    &store.discrete_inputs
                })
            }
            modbus_fn::READ_HOLDING_REGISTERS | modbus_fn::READ_INPUT_REGISTERS => {
                read_registers(function, body, if function == modbus_fn::READ_HOLDING_REGISTERS {
                    &store.holding_registers
                } else {
                    &store.input_registers
                })
            }
            modbus_fn::WRITE_SINGLE_COIL => write_single_coil(function, body, &mut store.coils),
            modbus_fn::WRITE_SINGLE_REGISTER => write_single_register(function, body, &mut store.holding_registers),
            modbus_fn::WRITE_MULTIPLE_COILS => write_multiple_coils(function, body, &mut store.coils),
            modbus_fn::WRITE_MULTIPLE_REGISTERS => {
                write_multiple_registers(function, body, &mut store.holding_registers)
            }
            other => Self::exception(other, ILLEGAL_FUNCTION),
        };
        Ok((Response::ok(req.service, pdu), true))
    }
}

fn read_bits(function: u8, body: &[u8], store: &[bool]) -> Vec<u8> {
    let (Some(address), Some(count)) = (read_u16(body, 0), read_u16(body, 2)) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    let (address, count) = (address as usize, count as usize);
    let Some(slice) = store.get(address..address + count) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    let packed = pack_bits(slice);
    let mut out = vec![function, packed.len() as u8];
    out.extend_from_slice(&packed);
    out
}

fn read_registers(function: u8, body: &[u8], store: &[u16]) -> Vec<u8> {
    let (Some(address), Some(count)) = (read_u16(body, 0), read_u16(body, 2)) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    let (address, count) = (address as usize, count as usize);
    let Some(slice) = store.get(address..address + count) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    let mut out = vec![function, (count * 2) as u8];
    for reg in slice {
        out.extend_from_slice(&reg.to_be_bytes());
    }
    out
}

fn write_single_coil(function: u8, body: &[u8], store: &mut [bool]) -> Vec<u8> {
    let (Some(address), Some(value)) = (read_u16(body, 0), read_u16(body, 2)) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    let Some(slot) = store.get_mut(address as usize) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    *slot = value == 0xFF00;
    let mut out = vec![function];
    out.extend_from_slice(&body[0..4]);
    out
}

fn write_single_register(function: u8, body: &[u8], store: &mut [u16]) -> Vec<u8> {
    let (Some(address), Some(value)) = (read_u16(body, 0), read_u16(body, 2)) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    let Some(slot) = store.get_mut(address as usize) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    *slot = value;
    let mut out = vec![function];
    out.extend_from_slice(&body[0..4]);
    out
}

fn write_multiple_coils(function: u8, body: &[u8], store: &mut [bool]) -> Vec<u8> {
    let (Some(address), Some(count)) = (read_u16(body, 0), read_u16(body, 2)) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    let (address, count) = (address as usize, count as usize);
    let Some(byte_count) = body.get(4) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    let Some(bytes) = body.get(5..5 + *byte_count as usize) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    if store.get(address..address + count).is_none() {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    }
    for i in 0..count {
        let bit = (bytes[i / 8] >> (i % 8)) & 1 == 1;
        store[address + i] = bit;
    }
    let mut out = vec![function];
    out.extend_from_slice(&(address as u16).to_be_bytes());
    out.extend_from_slice(&(count as u16).to_be_bytes());
    out
}

fn write_multiple_registers(function: u8, body: &[u8], store: &mut [u16]) -> Vec<u8> {
    let (Some(address), Some(count)) = (read_u16(body, 0), read_u16(body, 2)) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    let (address, count) = (address as usize, count as usize);
    let Some(byte_count) = body.get(4) else {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    };
    if *byte_count as usize != count * 2 || store.get(address..address + count).is_none() {
        return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
    }
    for i in 0..count {
        let Some(value) = read_u16(body, 5 + i * 2) else {
            return ModbusHandler::exception(function, ILLEGAL_DATA_ADDRESS);
        };
        store[address + i] = value;
    }
    let mut out = vec![function];
    out.extend_from_slice(&(address as u16).to_be_bytes());
    out.extend_from_slice(&(count as u16).to_be_bytes());
    out
}

fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2).and_then(|b| ByteOrder::Big.get_u16(b).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epath::LogicalPath;

    fn req(payload: Vec<u8>) -> Request {
        Request::new(service::GET_ATTRIBUTE_SINGLE, LogicalPath::class_instance(0x44, 1), payload)
    }

    #[test]
    fn read_holding_registers_returns_zeroed_store() {
        let handler = ModbusHandler::new(8, 8, 8, 8);
        let mut payload = vec![modbus_fn::READ_HOLDING_REGISTERS];
        payload.extend_from_slice(&0u16.to_be_bytes());
        payload.extend_from_slice(&2u16.to_be_bytes());
        let (resp, handled) = handler.handle(&req(payload)).unwrap();
        assert!(handled);
        assert_eq!(resp.payload, vec![modbus_fn::READ_HOLDING_REGISTERS, 4, 0, 0, 0, 0]);
    }

    #[test]
    fn write_then_read_single_register_round_trips() {
        let handler = ModbusHandler::new(0, 0, 8, 0);
        let mut write = vec![modbus_fn::WRITE_SINGLE_REGISTER];
        write.extend_from_slice(&3u16.to_be_bytes());
        write.extend_from_slice(&0xBEEFu16.to_be_bytes());
        handler.handle(&req(write)).unwrap();

        let mut read = vec![modbus_fn::READ_HOLDING_REGISTERS];
        read.extend_from_slice(&3u16.to_be_bytes());
        read.extend_from_slice(&1u16.to_be_bytes());
        let (resp, _) = handler.handle(&req(read)).unwrap();
        assert_eq!(resp.payload, vec![modbus_fn::READ_HOLDING_REGISTERS, 2, 0xBE, 0xEF]);
    }

    #[test]
    fn out_of_range_address_is_illegal_data_address_exception() {
        let handler = ModbusHandler::new(0, 0, 4, 0);
        let mut payload = vec![modbus_fn::READ_HOLDING_REGISTERS];
        payload.extend_from_slice(&10u16.to_be_bytes());
        payload.extend_from_slice(&1u16.to_be_bytes());
        let (resp, _) = handler.handle(&req(payload)).unwrap();
        assert_eq!(resp.payload, vec![modbus_fn::READ_HOLDING_REGISTERS | 0x80, ILLEGAL_DATA_ADDRESS]);
    }

    #[test]
    fn write_multiple_coils_packs_bits_correctly() {
        let handler = ModbusHandler::new(16, 0, 0, 0);
        let mut write = vec![modbus_fn::WRITE_MULTIPLE_COILS];
        write.extend_from_slice(&0u16.to_be_bytes());
        write.extend_from_slice(&3u16.to_be_bytes());
        write.push(1); // byte count
        write.push(0b0000_0101); // coil 0 and 2 set
        handler.handle(&req(write)).unwrap();

        let mut read = vec![modbus_fn::READ_COILS];
        read.extend_from_slice(&0u16.to_be_bytes());
        read.extend_from_slice(&3u16.to_be_bytes());
        let (resp, _) = handler.handle(&req(read)).unwrap();
        assert_eq!(resp.payload, vec![modbus_fn::READ_COILS, 1, 0b0000_0101]);
    }

    #[test]
    fn unsupported_class_is_not_handled() {
        let handler = ModbusHandler::new(1, 1, 1, 1);
        let other = Request::new(
            service::GET_ATTRIBUTE_SINGLE,
            LogicalPath::class_instance(0x01, 1),
            vec![modbus_fn::READ_COILS, 0, 0, 0, 1],
        );
        let (_, handled) = handler.handle(&other).unwrap();
        assert!(!handled);
    }
}

//! Replies specific to the extended query protocol.
//!
//! ParseComplete, BindComplete, CloseComplete and NoData carry no payload;
//! the state machines act on their tags alone.

use crate::error::{Error, Result};
use crate::protocol::codec::{read_i16, read_u32};
use crate::protocol::types::Oid;

/// ParameterDescription ('t'): the parameter types the server inferred.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    param_oids: Vec<Oid>,
}

impl ParameterDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (num_params, mut data) = read_i16(payload)?;
        let num_params = u16::try_from(num_params).map_err(|_| {
            Error::Protocol(format!("ParameterDescription: bad count {num_params}"))
        })?;

        let mut param_oids = Vec::with_capacity(num_params as usize);
        for _ in 0..num_params {
            let (oid, rest) = read_u32(data)?;
            param_oids.push(oid);
            data = rest;
        }

        Ok(Self { param_oids })
    }

    pub fn len(&self) -> usize {
        self.param_oids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.param_oids.is_empty()
    }

    pub fn oids(&self) -> &[Oid] {
        &self.param_oids
    }

    pub fn into_oids(self) -> Vec<Oid> {
        self.param_oids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;

    #[test]
    fn test_parameter_description() {
        let mut payload = 2_i16.to_be_bytes().to_vec();
        payload.extend_from_slice(&oid::INT2.to_be_bytes());
        payload.extend_from_slice(&oid::TEXT.to_be_bytes());

        let desc = ParameterDescription::parse(&payload).unwrap();
        assert_eq!(desc.oids(), &[oid::INT2, oid::TEXT]);

        payload.truncate(payload.len() - 1);
        assert!(ParameterDescription::parse(&payload).is_err());
    }
}

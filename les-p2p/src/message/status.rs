// Copyright @ 2023 - 2024, R3E Network
// All Rights Reserved

use les_base::encoding::{DecodeError, RlpDecode, RlpEncode, RlpReader, RlpWrite};
use les_base::UInt256;

pub const LES_VERSION_2: u64 = 2;

const KEY_PROTOCOL_VERSION: &str = "protocolVersion";
const KEY_NETWORK_ID: &str = "networkId";
const KEY_HEAD_TD: &str = "headTd";
const KEY_HEAD_HASH: &str = "headHash";
const KEY_HEAD_NUM: &str = "headNum";
const KEY_GENESIS_HASH: &str = "genesisHash";
const KEY_SERVE_HEADERS: &str = "serveHeaders";
const KEY_SERVE_CHAIN_SINCE: &str = "serveChainSince";
const KEY_SERVE_STATE_SINCE: &str = "serveStateSince";
const KEY_TX_RELAY: &str = "txRelay";
const KEY_FLOW_CONTROL_BL: &str = "flowControl/BL";
const KEY_FLOW_CONTROL_MRC: &str = "flowControl/MRC";
const KEY_FLOW_CONTROL_MRR: &str = "flowControl/MRR";
const KEY_ANNOUNCE_TYPE: &str = "announceType";

/// Cost of one request type under LES flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestCost {
    pub msg_code: u64,
    pub base_cost: u64,
    pub req_cost: u64,
}

impl RlpEncode for RequestCost {
    fn rlp_encode<W: RlpWrite>(&self, w: &mut W) {
        w.write_list(|buf| {
            buf.write_u64(self.msg_code);
            buf.write_u64(self.base_cost);
            buf.write_u64(self.req_cost);
        });
    }
}

impl RlpDecode for RequestCost {
    fn rlp_decode(r: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        let mut list = r.read_list()?;
        Ok(Self { msg_code: list.read_u64()?, base_cost: list.read_u64()?, req_cost: list.read_u64()? })
    }
}

/// The LES `Status` handshake message, a list of `[key, value]` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub protocol_version: u64,
    pub network_id: u64,
    pub head_td: UInt256,
    pub head_hash: UInt256,
    pub head_num: u64,
    pub genesis_hash: UInt256,

    pub serve_headers: bool,
    pub serve_chain_since: Option<u64>,
    pub serve_state_since: Option<u64>,
    pub tx_relay: bool,

    pub flow_control_bl: Option<u64>,
    pub flow_control_mrc: Vec<RequestCost>,
    pub flow_control_mrr: Option<u64>,

    /// Only carried by LES/2.
    pub announce_type: u64,
}

fn write_pair<W: RlpWrite, F: FnOnce(&mut Vec<u8>)>(w: &mut W, key: &str, value: F) {
    w.write_list(|buf| {
        buf.write_string(key.as_bytes());
        value(buf);
    });
}

fn write_flag<W: RlpWrite>(w: &mut W, key: &str) {
    w.write_list(|buf| buf.write_string(key.as_bytes()));
}

impl RlpEncode for Status {
    fn rlp_encode<W: RlpWrite>(&self, w: &mut W) {
        w.write_list(|buf| {
            write_pair(buf, KEY_PROTOCOL_VERSION, |v| v.write_u64(self.protocol_version));
            write_pair(buf, KEY_NETWORK_ID, |v| v.write_u64(self.network_id));
            write_pair(buf, KEY_HEAD_TD, |v| self.head_td.rlp_encode_uint(v));
            write_pair(buf, KEY_HEAD_HASH, |v| self.head_hash.rlp_encode(v));
            write_pair(buf, KEY_HEAD_NUM, |v| v.write_u64(self.head_num));
            write_pair(buf, KEY_GENESIS_HASH, |v| self.genesis_hash.rlp_encode(v));

            if self.serve_headers {
                write_flag(buf, KEY_SERVE_HEADERS);
            }
            if let Some(since) = self.serve_chain_since {
                write_pair(buf, KEY_SERVE_CHAIN_SINCE, |v| v.write_u64(since));
            }
            if let Some(since) = self.serve_state_since {
                write_pair(buf, KEY_SERVE_STATE_SINCE, |v| v.write_u64(since));
            }
            if self.tx_relay {
                write_flag(buf, KEY_TX_RELAY);
            }

            if let Some(bl) = self.flow_control_bl {
                write_pair(buf, KEY_FLOW_CONTROL_BL, |v| v.write_u64(bl));
            }
            if !self.flow_control_mrc.is_empty() {
                write_pair(buf, KEY_FLOW_CONTROL_MRC, |v| {
                    v.write_list(|costs| self.flow_control_mrc.iter().for_each(|c| c.rlp_encode(costs)))
                });
            }
            if let Some(mrr) = self.flow_control_mrr {
                write_pair(buf, KEY_FLOW_CONTROL_MRR, |v| v.write_u64(mrr));
            }

            if self.protocol_version == LES_VERSION_2 {
                write_pair(buf, KEY_ANNOUNCE_TYPE, |v| v.write_u64(self.announce_type));
            }
        });
    }
}

impl RlpDecode for Status {
    /// Unknown keys are skipped; the six chain keys are required.
    fn rlp_decode(r: &mut RlpReader<'_>) -> Result<Self, DecodeError> {
        let mut pairs = r.read_list()?;
        let mut status = Status::default();
        let (mut version, mut network, mut td, mut head, mut num, mut genesis) =
            (false, false, false, false, false, false);

        while !pairs.is_empty() {
            let mut pair = pairs.read_list()?;
            let key = pair.read_string()?;
            match key {
                b"protocolVersion" => {
                    status.protocol_version = pair.read_u64()?;
                    version = true;
                }
                b"networkId" => {
                    status.network_id = pair.read_u64()?;
                    network = true;
                }
                b"headTd" => {
                    status.head_td = UInt256::rlp_decode_uint(&mut pair)?;
                    td = true;
                }
                b"headHash" => {
                    status.head_hash = UInt256::rlp_decode(&mut pair)?;
                    head = true;
                }
                b"headNum" => {
                    status.head_num = pair.read_u64()?;
                    num = true;
                }
                b"genesisHash" => {
                    status.genesis_hash = UInt256::rlp_decode(&mut pair)?;
                    genesis = true;
                }
                b"serveHeaders" => status.serve_headers = true,
                b"serveChainSince" => status.serve_chain_since = Some(pair.read_u64()?),
                b"serveStateSince" => status.serve_state_since = Some(pair.read_u64()?),
                b"txRelay" => status.tx_relay = true,
                b"flowControl/BL" => status.flow_control_bl = Some(pair.read_u64()?),
                b"flowControl/MRC" => {
                    let mut costs = pair.read_list()?;
                    while !costs.is_empty() {
                        status.flow_control_mrc.push(RequestCost::rlp_decode(&mut costs)?);
                    }
                }
                b"flowControl/MRR" => status.flow_control_mrr = Some(pair.read_u64()?),
                b"announceType" => status.announce_type = pair.read_u64()?,
                _ => {}
            }
        }

        let required = [
            (version, KEY_PROTOCOL_VERSION),
            (network, KEY_NETWORK_ID),
            (td, KEY_HEAD_TD),
            (head, KEY_HEAD_HASH),
            (num, KEY_HEAD_NUM),
            (genesis, KEY_GENESIS_HASH),
        ];
        if let Some((_, key)) = required.iter().find(|(present, _)| !present) {
            return Err(DecodeError::InvalidValue(*key));
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    const MAINNET_GENESIS: [u8; 32] = hex!("d4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3");

    fn status() -> Status {
        Status {
            protocol_version: LES_VERSION_2,
            network_id: 1,
            head_td: UInt256::from_u64(0x0400_0000_0000),
            head_hash: UInt256::new([0x11; 32]),
            head_num: 5_000_000,
            genesis_hash: UInt256::new(MAINNET_GENESIS),
            serve_headers: true,
            serve_chain_since: Some(0),
            serve_state_since: Some(4_900_000),
            tx_relay: true,
            flow_control_bl: Some(300_000_000),
            flow_control_mrc: vec![
                RequestCost { msg_code: 2, base_cost: 150_000, req_cost: 30_000 },
                RequestCost { msg_code: 4, base_cost: 0, req_cost: 700_000 },
            ],
            flow_control_mrr: Some(50_000),
            announce_type: 1,
        }
    }

    #[test]
    fn test_status_codec() {
        let status = status();
        let encoded = status.to_rlp();
        assert_eq!(Status::from_rlp(&encoded).expect("decode should be ok"), status);

        // headTd is a trimmed integer, not a 32-byte string
        let mut r = RlpReader::new(&encoded);
        let mut pairs = r.read_list().expect("list");
        pairs.skip_item().expect("protocolVersion");
        pairs.skip_item().expect("networkId");
        assert_eq!(pairs.read_raw_item().expect("headTd"), &hex!("ce8668656164546486040000000000"));
    }

    #[test]
    fn test_announce_type_only_for_v2() {
        let mut status = status();
        status.protocol_version = 1;
        status.announce_type = 0;
        let encoded = status.to_rlp();
        assert!(!encoded.windows(KEY_ANNOUNCE_TYPE.len()).any(|w| w == KEY_ANNOUNCE_TYPE.as_bytes()));
        assert_eq!(Status::from_rlp(&encoded).expect("decode"), status);
    }

    #[test]
    fn test_status_unknown_and_missing_keys() {
        let mut buf = Vec::new();
        buf.write_list(|pairs| {
            write_pair(pairs, KEY_PROTOCOL_VERSION, |v| v.write_u64(2));
            write_pair(pairs, "someFutureKey", |v| v.write_list(|l| l.write_u64(7)));
            write_pair(pairs, KEY_NETWORK_ID, |v| v.write_u64(3));
            write_pair(pairs, KEY_HEAD_TD, |v| v.write_u64(17));
            write_pair(pairs, KEY_HEAD_HASH, |v| v.write_string(&[0x22; 32]));
            write_pair(pairs, KEY_HEAD_NUM, |v| v.write_u64(100));
            write_pair(pairs, KEY_GENESIS_HASH, |v| v.write_string(&MAINNET_GENESIS));
        });

        let status = Status::from_rlp(&buf).expect("decode should be ok");
        assert_eq!(status.network_id, 3);
        assert_eq!(status.head_td, UInt256::from_u64(17));
        assert!(!status.serve_headers);
        assert!(status.flow_control_mrc.is_empty());

        let mut missing = Vec::new();
        missing.write_list(|pairs| write_pair(pairs, KEY_PROTOCOL_VERSION, |v| v.write_u64(2)));
        assert!(Status::from_rlp(&missing).is_err());
    }
}

//! Domain events and the bridge contract ABI.

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::Log,
    sol,
    sol_types::SolEvent,
};
use serde::{Deserialize, Serialize};

sol! {
    /// Emitted by the standard bridge when an ERC20 deposit is initiated.
    #[sol(all_derives)]
    event ERC20BridgeInitiated(
        address indexed localToken,
        address indexed remoteToken,
        address indexed from,
        address to,
        uint256 amount,
        bytes extraData
    );
}

/// A deposit detected on the source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeEvent {
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
    pub local_token: Address,
    pub remote_token: Address,
    pub from: Address,
    /// Intended recipient. Zero when the bridge mints to the sender.
    pub to: Address,
    /// Raw token units.
    pub amount: U256,
    /// Block timestamp in milliseconds.
    pub timestamp: u64,
}

/// A gas top-up confirmed on the destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingEvent {
    pub recipient: Address,
    /// Wei sent to the recipient.
    pub amount: U256,
    pub tx_hash: B256,
    /// Wall clock time of the receipt, in milliseconds.
    pub timestamp: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("log has no block number")]
    MissingBlockNumber,

    #[error("log has no transaction hash")]
    MissingTxHash,

    #[error("failed to decode ERC20BridgeInitiated: {0}")]
    Abi(#[from] alloy::sol_types::Error),
}

/// Decodes an `ERC20BridgeInitiated` log. `timestamp_secs` is the block
/// timestamp, used when the RPC did not attach `blockTimestamp` to the log.
pub fn decode_bridge_log(log: &Log, timestamp_secs: Option<u64>) -> Result<BridgeEvent, DecodeError> {
    let block_number = log.block_number.ok_or(DecodeError::MissingBlockNumber)?;
    let tx_hash = log.transaction_hash.ok_or(DecodeError::MissingTxHash)?;
    let decoded = ERC20BridgeInitiated::decode_log(&log.inner)?;

    let seconds = log.block_timestamp.or(timestamp_secs).unwrap_or_default();

    Ok(BridgeEvent {
        block_number,
        tx_hash,
        log_index: log.log_index.unwrap_or_default(),
        local_token: decoded.data.localToken,
        remote_token: decoded.data.remoteToken,
        from: decoded.data.from,
        to: decoded.data.to,
        amount: decoded.data.amount,
        timestamp: seconds.saturating_mul(1000),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData, address};

    fn bridge_log(block_timestamp: Option<u64>) -> Log {
        let event = ERC20BridgeInitiated {
            localToken: address!("579CEa1889991f68aCc35Ff5c3dd0621fF29b0C9"),
            remoteToken: address!("6EFB84bda519726Fa1c65558e520B92b51712101"),
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            amount: U256::from(42u64),
            extraData: Bytes::new(),
        };

        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0xBB),
                data: event.encode_log_data(),
            },
            block_hash: None,
            block_number: Some(7),
            block_timestamp,
            transaction_hash: Some(B256::repeat_byte(0xAA)),
            transaction_index: Some(0),
            log_index: Some(3),
            removed: false,
        }
    }

    #[test]
    fn decodes_all_fields() {
        let event = decode_bridge_log(&bridge_log(Some(1_700_000_000)), None).unwrap();

        assert_eq!(event.block_number, 7);
        assert_eq!(event.tx_hash, B256::repeat_byte(0xAA));
        assert_eq!(event.log_index, 3);
        assert_eq!(
            event.local_token,
            address!("579CEa1889991f68aCc35Ff5c3dd0621fF29b0C9")
        );
        assert_eq!(event.from, Address::repeat_byte(0x11));
        assert_eq!(event.to, Address::repeat_byte(0x22));
        assert_eq!(event.amount, U256::from(42u64));
        assert_eq!(event.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn falls_back_to_header_timestamp() {
        let event = decode_bridge_log(&bridge_log(None), Some(12)).unwrap();
        assert_eq!(event.timestamp, 12_000);
    }

    #[test]
    fn rejects_pending_logs() {
        let mut log = bridge_log(None);
        log.block_number = None;
        assert!(matches!(
            decode_bridge_log(&log, None),
            Err(DecodeError::MissingBlockNumber)
        ));
    }

    #[test]
    fn rejects_foreign_events() {
        let mut log = bridge_log(None);
        log.inner.data = LogData::new_unchecked(vec![B256::repeat_byte(0x01)], Bytes::new());
        assert!(matches!(
            decode_bridge_log(&log, None),
            Err(DecodeError::Abi(_))
        ));
    }

    #[test]
    fn bridge_event_serializes_camel_case() {
        let event = decode_bridge_log(&bridge_log(Some(1)), None).unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["blockNumber"], 7);
        assert!(json.get("txHash").is_some());
    }
}

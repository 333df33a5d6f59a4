use async_trait::async_trait;
use gridbroker_types::{CancellationReason, Policy};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{BaseContracts, ChainAdapter, ChainError};

// Function selectors of the platform contracts.
const DIRECTORY_GET_ENTRY: &str = "693ec85e";
const AGREEMENTS_RECORDED: &str = "aa1c59da";
const AGREEMENTS_TERMINATE: &str = "4c2d4e31";

/// Chain adapter speaking raw JSON-RPC to an Ethereum node.
///
/// Contract addresses come from the on-chain directory; the directory address
/// and the producer account are deployment facts supplied at construction.
pub struct EthereumAdapter {
    geth_url: String,
    account: String,
    directory_address: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl EthereumAdapter {
    pub fn new(
        geth_url: impl Into<String>,
        account: impl Into<String>,
        directory_address: impl Into<String>,
    ) -> Self {
        Self {
            geth_url: geth_url.into(),
            account: account.into(),
            directory_address: directory_address.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn rpc(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ChainError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        debug!(method = %method, "ethereum rpc call");

        let response = self
            .client
            .post(&self.geth_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Rpc(format!("malformed rpc response: {}", e)))?;

        if let Some(error) = body.error {
            return Err(ChainError::Rpc(format!(
                "{} (code {})",
                error.message, error.code
            )));
        }

        body.result
            .ok_or_else(|| ChainError::Rpc("rpc response missing result".to_string()))
    }

    async fn eth_call(&self, to: &str, data: String) -> Result<String, ChainError> {
        let result = self
            .rpc(
                "eth_call",
                json!([{ "to": to, "data": format!("0x{}", data) }, "latest"]),
            )
            .await?;

        result
            .as_str()
            .map(|s| s.trim_start_matches("0x").to_string())
            .ok_or_else(|| ChainError::Rpc("eth_call result is not a string".to_string()))
    }
}

#[async_trait]
impl ChainAdapter for EthereumAdapter {
    async fn init_contracts(&self) -> Result<BaseContracts, ChainError> {
        let data = format!("{}{}", DIRECTORY_GET_ENTRY, encode_string("agreements"));
        let result = self.eth_call(&self.directory_address, data).await?;

        let agreements = decode_address(&result)?;
        if agreements == "0x0000000000000000000000000000000000000000" {
            return Err(ChainError::ContractLookup(
                "directory has no agreements contract".to_string(),
            ));
        }

        debug!(agreements = %agreements, "resolved platform contracts");

        Ok(BaseContracts {
            directory: self.directory_address.clone(),
            agreements,
        })
    }

    async fn verify_agreement_recorded(
        &self,
        agreement_id: &str,
        counterparty_address: &str,
        proposal_sig: &str,
        contracts: &BaseContracts,
    ) -> Result<bool, ChainError> {
        // agreement_recorded(bytes32 id, address counterparty, bytes sig)
        let head = format!(
            "{}{}{}",
            id_word(agreement_id)?,
            address_word(counterparty_address)?,
            uint_word(0x60),
        );
        let data = format!(
            "{}{}{}",
            AGREEMENTS_RECORDED,
            head,
            encode_bytes(proposal_sig)?
        );

        let result = self.eth_call(&contracts.agreements, data).await?;
        decode_bool(&result)
    }

    async fn terminate_agreement(
        &self,
        producer_policy: &Policy,
        counterparty_address: &str,
        agreement_id: &str,
        reason: CancellationReason,
        contracts: &BaseContracts,
    ) -> Result<(), ChainError> {
        debug!(
            agreement_id = %agreement_id,
            policy = %producer_policy.header.name,
            reason = reason.code(),
            "terminating agreement on chain"
        );

        // terminate_agreement(bytes32 id, address counterparty, uint256 reason)
        let data = format!(
            "{}{}{}{}",
            AGREEMENTS_TERMINATE,
            id_word(agreement_id)?,
            address_word(counterparty_address)?,
            uint_word(reason.code() as u64),
        );

        self.rpc(
            "eth_sendTransaction",
            json!([{
                "from": self.account,
                "to": contracts.agreements,
                "data": format!("0x{}", data),
            }]),
        )
        .await?;

        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────────────────
// ABI encoding helpers
// ───────────────────────────────────────────────────────────────────────────

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn is_hex(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_hexdigit())
}

/// One 32-byte word holding an agreement id. Hex ids are used verbatim;
/// anything else is encoded as its UTF-8 bytes, which must fit the word.
fn id_word(agreement_id: &str) -> Result<String, ChainError> {
    let stripped = agreement_id.trim_start_matches("0x");
    let raw = if is_hex(stripped) {
        stripped.to_lowercase()
    } else {
        hex_encode(agreement_id.as_bytes())
    };

    if raw.len() > 64 {
        return Err(ChainError::Encoding(format!(
            "agreement id does not fit a word: {}",
            agreement_id
        )));
    }
    Ok(format!("{:0<64}", raw))
}

fn address_word(address: &str) -> Result<String, ChainError> {
    let stripped = address.trim_start_matches("0x");
    if !is_hex(stripped) || stripped.len() > 40 {
        return Err(ChainError::Encoding(format!(
            "not an address: {}",
            address
        )));
    }
    Ok(format!("{:0>64}", stripped.to_lowercase()))
}

fn uint_word(value: u64) -> String {
    format!("{:064x}", value)
}

fn encode_string(text: &str) -> String {
    // offset, length, then right-padded payload
    let payload = hex_encode(text.as_bytes());
    let padded_len = (payload.len() + 63) / 64 * 64;
    format!(
        "{}{}{:0<width$}",
        uint_word(0x20),
        uint_word(text.len() as u64),
        payload,
        width = padded_len
    )
}

fn encode_bytes(hex_payload: &str) -> Result<String, ChainError> {
    let stripped = hex_payload.trim_start_matches("0x");
    if !stripped.is_empty() && !is_hex(stripped) {
        return Err(ChainError::Encoding("payload is not hex".to_string()));
    }
    let padded_len = (stripped.len() + 63) / 64 * 64;
    Ok(format!(
        "{}{:0<width$}",
        uint_word((stripped.len() / 2) as u64),
        stripped.to_lowercase(),
        width = padded_len
    ))
}

fn decode_address(word: &str) -> Result<String, ChainError> {
    if word.len() < 64 {
        return Err(ChainError::Rpc(format!("short call result: {}", word)));
    }
    Ok(format!("0x{}", &word[word.len() - 40..]))
}

fn decode_bool(word: &str) -> Result<bool, ChainError> {
    if !is_hex(word) {
        return Err(ChainError::Rpc(format!(
            "call result is not an abi word: {:?}",
            word
        )));
    }
    // any nonzero word reads as true
    Ok(word.bytes().any(|b| b != b'0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_word_hex_and_text() {
        let word = id_word("0xDEADBEEF").unwrap();
        assert_eq!(word.len(), 64);
        assert!(word.starts_with("deadbeef"));

        let word = id_word("ag-1").unwrap();
        assert_eq!(word.len(), 64);
        assert!(word.starts_with(&hex_encode(b"ag-1")));

        // 33 bytes of text cannot fit a 32-byte word
        let too_long = "z".repeat(33);
        assert!(id_word(&too_long).is_err());
    }

    #[test]
    fn test_address_word_left_pads() {
        let word = address_word("0xA").unwrap();
        assert_eq!(word.len(), 64);
        assert!(word.ends_with('a'));
        assert!(word.starts_with('0'));

        assert!(address_word("not-an-address").is_err());
    }

    #[test]
    fn test_encode_string_layout() {
        let encoded = encode_string("agreements");
        // offset word, length word, one payload word
        assert_eq!(encoded.len(), 3 * 64);
        assert!(encoded.starts_with(&uint_word(0x20)));
        assert!(encoded[64..128].ends_with('a')); // 10 = 0xa
    }

    #[test]
    fn test_decode_bool() {
        assert!(decode_bool(&uint_word(1)).unwrap());
        assert!(!decode_bool(&uint_word(0)).unwrap());

        // any nonzero word counts as true, not just canonical 1
        assert!(decode_bool(&uint_word(0x10)).unwrap());
        assert!(decode_bool(&uint_word(2)).unwrap());

        assert!(decode_bool("").is_err());
        assert!(decode_bool("zz").is_err());
    }

    #[test]
    fn test_decode_address_takes_low_bytes() {
        let word = address_word("0x00000000000000000000000000000000000a97ee").unwrap();
        assert_eq!(
            decode_address(&word).unwrap(),
            "0x00000000000000000000000000000000000a97ee"
        );
    }
}

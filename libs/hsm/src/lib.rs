//! Client for the PIN-translation HSM.
//!
//! Every call opens a fresh short-lived TCP connection, frames the
//! command as `<2-byte BE length><hex-encoded ASCII command>`, reads up
//! to 1024 bytes back, hex-decodes the response, and checks the decoded
//! bytes at offset `[8:10]` against the ASCII literal `"00"` for success.

mod error;

pub use error::HsmError;

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const READ_CEILING: usize = 1024;

#[derive(Debug, Clone)]
pub struct HsmClient {
    address: String,
    timeout: Duration,
}

impl HsmClient {
    pub fn new(address: impl Into<String>) -> Self {
        HsmClient { address: address.into(), timeout: Duration::from_secs(5) }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `GenerateKey(TMK) -> (TWK, TPK)`, issued on terminal logon.
    pub async fn generate_key(&self, tmk: &str) -> Result<(String, String), HsmError> {
        let command = format!("0000HC{tmk};XU0");
        let resp = self.call(&command).await?;
        let twk = slice(&resp, 11, 43)?;
        let tpk = slice(&resp, 43, 76)?;
        Ok((twk, tpk))
    }

    /// `StoreZPK(ZMK, ZPK) -> encrypted ZPK`, issued on host key-change.
    pub async fn store_zpk(&self, zmk: &str, zpk: &str) -> Result<String, HsmError> {
        let command = format!("GIKUFA{zmk}U{zpk}");
        let resp = self.call(&command).await?;
        slice(&resp, 10, 43)
    }

    /// `TranslatePin(TPK, ZPK, pin_block, pan_parsed) -> re-encrypted PIN block`.
    pub async fn translate_pin(
        &self,
        tpk: &str,
        zpk: &str,
        pin_block: &str,
        pan_parsed: &str,
    ) -> Result<String, HsmError> {
        let command = format!("GIKUCA{tpk}{zpk}12{pin_block}0101{pan_parsed}");
        let resp = self.call(&command).await?;
        slice(&resp, 12, 28)
    }

    async fn call(&self, command: &str) -> Result<String, HsmError> {
        let fut = self.call_inner(command);
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(HsmError::Timeout),
        }
    }

    async fn call_inner(&self, command: &str) -> Result<String, HsmError> {
        let mut stream = TcpStream::connect(&self.address).await?;

        let hex_command = hex::encode_upper(command.as_bytes());
        let len = hex_command.len() as u16;
        let mut request = Vec::with_capacity(2 + hex_command.len());
        request.extend_from_slice(&len.to_be_bytes());
        request.extend_from_slice(hex_command.as_bytes());

        debug!(bytes = request.len(), "sending HSM request");
        stream.write_all(&request).await?;
        stream.flush().await?;

        let mut buf = vec![0u8; READ_CEILING];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);

        let decoded = hex::decode(&buf).map_err(|_| HsmError::MalformedResponse)?;
        let resp = String::from_utf8(decoded).map_err(|_| HsmError::MalformedResponse)?;

        if resp.len() < 10 {
            return Err(HsmError::ShortResponse { expected: 10, got: resp.len() });
        }
        let code = &resp[8..10];
        if code != "00" {
            warn!(code, "HSM rejected request");
            return Err(HsmError::Failure(code.to_string()));
        }

        Ok(resp)
    }
}

/// `panParsed` per ISO 9564 format-0: the PAN digits from index `len-13`
/// up to (not including) `len-1` — 12 digits.
pub fn parse_pan(pan: &str) -> Result<String, HsmError> {
    if pan.len() < 13 {
        return Err(HsmError::PanTooShort(pan.to_string()));
    }
    let start = pan.len() - 13;
    let end = pan.len() - 1;
    Ok(pan[start..end].to_string())
}

fn slice(resp: &str, start: usize, end: usize) -> Result<String, HsmError> {
    if resp.len() < end {
        return Err(HsmError::ShortResponse { expected: end, got: resp.len() });
    }
    Ok(resp[start..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn stub_hsm(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 2];
            sock.read_exact(&mut header).await.unwrap();
            let len = u16::from_be_bytes(header) as usize;
            let mut body = vec![0u8; len];
            sock.read_exact(&mut body).await.unwrap();

            let hex_resp = hex::encode_upper(response.as_bytes());
            sock.write_all(hex_resp.as_bytes()).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn generate_key_parses_twk_and_tpk() {
        // 8 filler bytes, "00" status, 11-byte pad, 32-hex TWK, 33-hex TPK tail.
        let twk = "A".repeat(32);
        let tpk = "B".repeat(33);
        let resp = format!("{}00{}{}{}", "X".repeat(8), "Y".repeat(1), twk, tpk);
        let addr = stub_hsm(Box::leak(resp.into_boxed_str())).await;

        let client = HsmClient::new(addr);
        let (got_twk, got_tpk) = client.generate_key("TMKTMKTMKTMKTMKT").await.unwrap();
        assert_eq!(got_twk, twk);
        assert_eq!(got_tpk, tpk);
    }

    #[tokio::test]
    async fn non_zero_zero_code_is_a_failure() {
        let resp = format!("{}55{}", "X".repeat(8), "Z".repeat(40));
        let addr = stub_hsm(Box::leak(resp.into_boxed_str())).await;

        let client = HsmClient::new(addr);
        let err = client.store_zpk("ZMK", "ZPK").await.unwrap_err();
        assert!(matches!(err, HsmError::Failure(code) if code == "55"));
    }

    #[test]
    fn parse_pan_takes_12_digits_before_the_check_digit() {
        let pan = "4111111111111111";
        let parsed = parse_pan(pan).unwrap();
        assert_eq!(parsed.len(), 12);
        assert_eq!(parsed, &pan[pan.len() - 13..pan.len() - 1]);
    }

    #[test]
    fn parse_pan_rejects_short_pan() {
        assert!(matches!(parse_pan("123"), Err(HsmError::PanTooShort(_))));
    }
}

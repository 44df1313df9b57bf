//! Network-management FSM: logon, sign-on, sign-off, key-change, and
//! echo, all riding MTI `0800`/`0810` and distinguished by field 70.
//! Logon is terminal-initiated and answered locally; sign-on, sign-off,
//! key-change, and echo are host-initiated.

use chrono::Utc;
use db::DbPool;
use hsm::HsmClient;
use iso8583::Message;
use tracing::info;

use crate::error::GatewayError;

pub const B70_SIGN_ON: &str = "001";
pub const B70_SIGN_OFF: &str = "002";
pub const B70_LOGON: &str = "101";
pub const B70_KEY_CHANGE: &str = "102";
pub const B70_ECHO: &str = "301";

/// Builds a local `0810` logon reply: provisions a new Terminal Working
/// Key via the HSM, persists the new Terminal PIN Key for this TID, and
/// echoes the original STAN with the TWK placed in field 48. Never
/// forwarded to the host.
pub async fn handle_logon(
    request: &Message,
    hsm: &HsmClient,
    pool: &DbPool,
    tmk: &str,
) -> Result<Message, GatewayError> {
    let tid = request.get(41)?;
    let stan = request.get(11)?;

    let (twk, tpk) = hsm.generate_key(tmk).await?;

    db::upsert_terminal_key(pool, tid, &tpk, Utc::now().fixed_offset()).await?;
    info!(tid, "logon: provisioned new terminal key");

    let mut response = request.clone();
    response.set(39, "00")?;
    response.set(48, twk)?;
    response.set(11, stan)?;
    response.set_mti("0810");
    Ok(response)
}

/// Host-initiated `0800` dispatch — everything except logon. Returns the
/// `0810` reply to send back on the host link.
pub async fn handle_host_request(
    request: &Message,
    hsm: &HsmClient,
    pool: &DbPool,
    zmk: &str,
) -> Result<Message, GatewayError> {
    let b70 = request.get(70)?;

    match b70 {
        B70_SIGN_ON | B70_SIGN_OFF | B70_ECHO => Ok(plain_ack(request)),
        B70_KEY_CHANGE => {
            let de48 = request.get(48)?;
            if de48.len() < 32 {
                return Err(GatewayError::InvalidTransaction("field 48 too short for a ZPK"));
            }
            let zpk = &de48[..32];

            let encrypted_zpk = hsm.store_zpk(zmk, zpk).await?;
            db::update_zpk(pool, &encrypted_zpk).await?;
            info!("key-change: stored new ZPK");

            let mut response = request.clone();
            response.set(39, "00")?;
            response.unset_field(48);
            response.set_mti("0810");
            Ok(response)
        }
        _ => Err(GatewayError::InvalidTransaction("unrecognized network-management info code")),
    }
}

fn plain_ack(request: &Message) -> Message {
    let mut response = request.clone();
    let _ = response.set(39, "00");
    response.set_mti("0810");
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign_on_request() -> Message {
        let mut m = Message::new("0800");
        m.set(7, "0102150405").unwrap();
        m.set(11, "000001").unwrap();
        m.set(32, "99998888").unwrap();
        m.set(70, B70_SIGN_ON).unwrap();
        m
    }

    #[test]
    fn plain_ack_sets_rc_00_and_mti_0810() {
        let req = sign_on_request();
        let ack = plain_ack(&req);
        assert_eq!(ack.mti(), "0810");
        assert_eq!(ack.get(39).unwrap(), "00");
        assert_eq!(ack.get(11).unwrap(), "000001");
    }
}

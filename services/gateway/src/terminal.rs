//! Per-terminal session handler: one task per accepted connection,
//! reading frames until inactivity timeout or a fatal protocol error,
//! dispatching each by MTI, and replying on the same framed TPDU the
//! request arrived on.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use iso8583::{convert, Dialect, Message};
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

use crate::correlator::rewrite_outbound_stan;
use crate::error::GatewayError;
use crate::license;
use crate::netmgmt;
use crate::router::HostResponse;
use crate::util::{julian_day_number, mask_pan, parse_trx_date};
use crate::Context;

/// The 5-byte Terminal Protocol Data Unit carried ahead of every ISO body
/// on the terminal link. Remembered per connection so a reply can echo
/// it back with `dst`/`src` swapped.
#[derive(Debug, Clone, Copy)]
struct Tpdu {
    dst: [u8; 2],
    src: [u8; 2],
}

/// What a dispatch branch produced: either a message to frame back to the
/// terminal, or nothing at all (a timed-out reversal advice, or a silently
/// dropped late response).
enum Outcome {
    Respond(Message),
    NoResponse,
}

/// An error raised while handling one terminal frame, carrying the
/// response code to report and whether the connection should be dropped
/// afterwards.
struct TermError {
    rc: &'static str,
    message: String,
    fatal: bool,
}

impl TermError {
    fn new(rc: &'static str, message: String, fatal: bool) -> Self {
        TermError { rc, message, fatal }
    }
}

impl From<GatewayError> for TermError {
    fn from(e: GatewayError) -> Self {
        let fatal = e.is_fatal_to_connection();
        TermError::new(e.response_code(), e.to_string(), fatal)
    }
}

impl From<iso8583::IsoError> for TermError {
    fn from(e: iso8583::IsoError) -> Self {
        TermError::new("96", e.to_string(), false)
    }
}

/// Runs the read loop for one accepted terminal connection. Returns when
/// the connection closes, times out, or hits a fatal protocol error. The
/// semaphore permit is held for the lifetime of this task, which is what
/// actually enforces the accept server's concurrency bound.
pub async fn run(mut stream: TcpStream, _permit: OwnedSemaphorePermit, ctx: Arc<Context>) {
    let peer = stream.peer_addr().ok();
    let mut tpdu: Option<Tpdu> = None;

    loop {
        let payload = match frame::read_frame(&mut stream, ctx.config.timeout_inactivity).await {
            Ok(payload) => payload,
            Err(frame::FrameError::Eof) => return,
            Err(frame::FrameError::Timeout(_)) => return,
            Err(e) => {
                debug!(?peer, error = %e, "terminal connection read error");
                return;
            }
        };

        if ctx.config.debug_log {
            debug!(debug_tag = "dl_in", ?peer, payload = %hex::encode_upper(&payload), "terminal frame in");
        }

        if !license::check(&ctx.config.license_key) {
            respond_error(&mut stream, &tpdu, None, "15").await;
            return;
        }

        if payload.len() < 5 || payload[0] != 0x60 {
            respond_error(&mut stream, &tpdu, None, "12").await;
            return;
        }
        tpdu = Some(Tpdu {
            dst: [payload[1], payload[2]],
            src: [payload[3], payload[4]],
        });

        let request = match iso8583::unpack(&payload[5..], Dialect::Ascii) {
            Ok(m) => m,
            Err(e) => {
                warn!(?peer, error = %e, "failed to unpack terminal ISO body");
                respond_error(&mut stream, &tpdu, None, "96").await;
                return;
            }
        };

        match dispatch(&ctx, request.clone()).await {
            Ok(Outcome::Respond(response)) => send_response(&mut stream, &tpdu, &response, &ctx).await,
            Ok(Outcome::NoResponse) => {}
            Err(e) => {
                warn!(?peer, error = %e.message, rc = e.rc, "terminal request failed");
                respond_error(&mut stream, &tpdu, Some(&request), e.rc).await;
                if e.fatal {
                    return;
                }
            }
        }
    }
}

async fn dispatch(ctx: &Context, request: Message) -> Result<Outcome, TermError> {
    match request.mti() {
        "0800" => handle_netmgmt(ctx, request).await,
        "0200" => handle_financial(ctx, request).await,
        "0400" => handle_reversal(ctx, request).await,
        other => Err(TermError::new("12", format!("unsupported MTI {other}"), false)),
    }
}

async fn handle_netmgmt(ctx: &Context, mut request: Message) -> Result<Outcome, TermError> {
    let b70 = request.get(70)?.to_string();

    if b70 == netmgmt::B70_LOGON {
        let tmk = db::get_tmk(&ctx.pool).await.map_err(GatewayError::from)?;
        let response = netmgmt::handle_logon(&request, &ctx.hsm, &ctx.pool, &tmk)
            .await
            .map_err(TermError::from)?;
        return Ok(Outcome::Respond(response));
    }

    let client_stan = request.get(11)?.to_string();
    if client_stan.is_empty() {
        return Err(TermError::new("30", "network-management request carries no STAN".into(), true));
    }

    let host_stan = ctx.correlator.allocate_host_stan(&client_stan).await?;
    rewrite_outbound_stan(&mut request, &host_stan)?;

    match forward_and_wait(ctx, &host_stan, &request, ctx.config.timeout_trx).await? {
        Some(host_response) => {
            let mut response = convert::convert(&host_response.message);
            let client_stan = ctx
                .correlator
                .take_client_stan(&host_stan)
                .await
                .ok_or_else(|| TermError::new("96", "host stan missing from correlator".into(), false))?;
            response.set(11, client_stan)?;
            Ok(Outcome::Respond(response))
        }
        None => Ok(Outcome::NoResponse),
    }
}

async fn handle_financial(ctx: &Context, mut request: Message) -> Result<Outcome, TermError> {
    let client_stan = request.get(11)?.to_string();
    if client_stan.is_empty() {
        return Err(TermError::new("30", "financial request carries no STAN".into(), true));
    }

    let tid = request.get(41).unwrap_or("").to_string();
    let mid = request.get(42).unwrap_or("").to_string();
    let procode = request.get(3).unwrap_or("").to_string();
    let pan = request.get(2).unwrap_or("").to_string();
    let amount: i64 = request.get(4).ok().and_then(|s| s.parse().ok()).unwrap_or(0);
    let merchant_name = request.get(43).unwrap_or("").to_string();
    let trx_date = parse_trx_date(request.get(12).ok(), request.get(13).ok());

    let host_stan = ctx.correlator.allocate_host_stan(&client_stan).await?;

    let jdn = julian_day_number(Utc::now());
    let host_stan_int: u64 = host_stan.parse().unwrap_or(0);
    request.set(37, format!("{:06}{:06}", jdn.rem_euclid(1_000_000), host_stan_int))?;

    let iso_req_hex = hex::encode_upper(iso8583::pack(&request, Dialect::Ascii).map_err(TermError::from)?);

    let new_row = db::NewTransaction {
        mti: request.mti().to_string(),
        procode,
        tid: tid.clone(),
        mid,
        pan: mask_pan(&pan),
        amount,
        trx_date,
        stan: client_stan.clone(),
        stan_host: host_stan.clone(),
        rrn: request.get(37)?.to_string(),
        merchant_name,
        iso_req: iso_req_hex,
        created_at: Utc::now().fixed_offset(),
    };
    let trx_id = db::insert_transaction(&ctx.pool, &new_row).await.map_err(GatewayError::from)?;

    rewrite_outbound_stan(&mut request, &host_stan)?;

    let pin_block = request.get(52).unwrap_or("").to_string();
    if !pin_block.is_empty() {
        let zpk = db::get_zpk(&ctx.pool).await.map_err(GatewayError::from)?;
        let tpk = db::get_tpk(&ctx.pool, &tid).await.map_err(GatewayError::from)?;
        let pan_parsed = hsm::parse_pan(&pan).map_err(GatewayError::from)?;
        let translated = ctx
            .hsm
            .translate_pin(&tpk, &zpk, &pin_block, &pan_parsed)
            .await
            .map_err(GatewayError::from)?;
        request.set(52, translated)?;
    }

    match forward_and_wait(ctx, &host_stan, &request, ctx.config.timeout_trx).await? {
        Some(host_response) => {
            let mut response = convert::convert(&host_response.message);
            let client_stan = ctx
                .correlator
                .take_client_stan(&host_stan)
                .await
                .ok_or_else(|| TermError::new("96", "host stan missing from correlator".into(), false))?;
            response.set(11, client_stan)?;

            let response_code = response.get(39).unwrap_or("96").to_string();
            let iso_res_hex = hex::encode_upper(iso8583::pack(&response, Dialect::Hex).map_err(TermError::from)?);
            db::update_transaction_response(&ctx.pool, trx_id, &response_code, &iso_res_hex, Utc::now().fixed_offset())
                .await
                .map_err(GatewayError::from)?;

            Ok(Outcome::Respond(response))
        }
        // Financial timeouts are silent: the terminal will retry or reverse
        // on its own.
        None => Ok(Outcome::NoResponse),
    }
}

async fn handle_reversal(ctx: &Context, mut request: Message) -> Result<Outcome, TermError> {
    let client_stan = request.get(11)?.to_string();
    if client_stan.is_empty() {
        return Err(TermError::new("30", "reversal carries no STAN".into(), true));
    }

    let tid = request.get(41).unwrap_or("").to_string();
    let mid = request.get(42).unwrap_or("").to_string();
    let procode = request.get(3).unwrap_or("").to_string();
    let amount: i64 = request.get(4).ok().and_then(|s| s.parse().ok()).unwrap_or(0);
    let trx_date = parse_trx_date(request.get(12).ok(), request.get(13).ok());

    let lookup = db::ReversalLookup {
        procode: procode.clone(),
        amount,
        stan: client_stan.clone(),
        tid: tid.clone(),
        mid: mid.clone(),
        trx_date,
    };
    let existing_host_stan = db::lookup_host_stan_for_reversal(&ctx.pool, &lookup)
        .await
        .map_err(GatewayError::from)?;

    let Some(host_stan) = existing_host_stan else {
        // No matching 0200 on file: answer locally, no host round-trip.
        let mut response = request.clone();
        response.set_mti("0410");
        response.set(39, "00")?;
        return Ok(Outcome::Respond(response));
    };

    let iso_req_hex = hex::encode_upper(iso8583::pack(&request, Dialect::Ascii).map_err(TermError::from)?);
    let new_row = db::NewTransaction {
        mti: request.mti().to_string(),
        procode,
        tid: tid.clone(),
        mid,
        pan: String::new(),
        amount,
        trx_date,
        stan: client_stan.clone(),
        stan_host: host_stan.clone(),
        rrn: request.get(37).unwrap_or("").to_string(),
        merchant_name: request.get(43).unwrap_or("").to_string(),
        iso_req: iso_req_hex,
        created_at: Utc::now().fixed_offset(),
    };
    let trx_id = db::insert_transaction(&ctx.pool, &new_row).await.map_err(GatewayError::from)?;

    // This reversal replays under the host STAN already on file, not a
    // fresh allocation (the correlator's stan_map never sees an entry
    // for this request — the client STAN is already known locally).
    request.set(11, host_stan.clone())?;
    let advice_key = format!("{tid}{client_stan}");
    let is_advice = ctx.correlator.has_reversal_advice(&advice_key).await;
    request.set_mti(if is_advice { "0421" } else { "0420" });

    match forward_and_wait(ctx, &host_stan, &request, ctx.config.timeout_trx).await? {
        Some(host_response) => {
            let mut response = convert::convert(&host_response.message);
            response.set(11, client_stan)?;
            convert::normalize_reversal_mti(&mut response);

            let response_code = response.get(39).unwrap_or("96").to_string();
            let iso_res_hex = hex::encode_upper(iso8583::pack(&response, Dialect::Hex).map_err(TermError::from)?);
            db::update_transaction_response(&ctx.pool, trx_id, &response_code, &iso_res_hex, Utc::now().fixed_offset())
                .await
                .map_err(GatewayError::from)?;

            if response_code == "00" {
                ctx.correlator.clear_reversal_advice(&advice_key).await;
            }
            Ok(Outcome::Respond(response))
        }
        None => {
            // Only a fresh 0420 graduates into a stored advice; a timed-out
            // 0421 (or anything else) is dropped silently.
            if request.mti() == "0420" {
                ctx.correlator.store_reversal_advice(advice_key, request).await;
            }
            Ok(Outcome::NoResponse)
        }
    }
}

/// Registers a response waiter, sends `outbound` to the host (hex
/// dialect), and waits up to `timeout` for the reply. `Ok(None)` means the
/// wait timed out; the caller decides what that means for its MTI.
async fn forward_and_wait(
    ctx: &Context,
    host_stan: &str,
    outbound: &Message,
    timeout: Duration,
) -> Result<Option<HostResponse>, TermError> {
    let rx = ctx.router.register(host_stan).map_err(TermError::from)?;

    let bytes = iso8583::pack(outbound, Dialect::Hex).map_err(TermError::from)?;
    if let Err(e) = ctx.upstream.send(&bytes).await {
        ctx.router.unregister(host_stan);
        ctx.correlator.discard(host_stan).await;
        return Err(TermError::from(e));
    }

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(response)) => Ok(Some(response)),
        Ok(Err(_)) => Err(TermError::new("96", "response channel dropped before delivery".into(), false)),
        Err(_) => {
            ctx.router.unregister(host_stan);
            Ok(None)
        }
    }
}

async fn send_response(stream: &mut TcpStream, tpdu: &Option<Tpdu>, response: &Message, ctx: &Context) {
    match iso8583::pack(response, Dialect::Ascii) {
        Ok(bytes) => {
            if ctx.config.debug_log {
                debug!(debug_tag = "dl_out", payload = %hex::encode_upper(&bytes), "terminal frame out");
            }
            send_framed(stream, tpdu, &bytes).await;
        }
        Err(e) => warn!(error = %e, "failed to pack terminal response"),
    }
}

async fn respond_error(stream: &mut TcpStream, tpdu: &Option<Tpdu>, original: Option<&Message>, rc: &'static str) {
    let response = build_error_response(original, rc);
    match iso8583::pack(&response, Dialect::Ascii) {
        Ok(bytes) => send_framed(stream, tpdu, &bytes).await,
        Err(e) => warn!(error = %e, rc, "failed to pack error response"),
    }
}

/// Builds an error response: the response MTI forces the originator
/// digit to `1` when recoverable from `original`, falls back to
/// `"0000"` when `original` is absent or corrupt, carries field 7 (UTC
/// transmission time), field 11 (the original STAN, if any), and field
/// 39 (`rc`).
fn build_error_response(original: Option<&Message>, rc: &str) -> Message {
    let response_mti = match original.map(Message::mti) {
        Some(mti) if mti.len() == 4 && mti.as_bytes()[2] == b'0' => {
            format!("{}1{}", &mti[0..2], &mti[3..4])
        }
        Some(mti) if mti.len() == 4 => mti.to_string(),
        _ => "0000".to_string(),
    };

    let mut response = Message::new(response_mti);
    let _ = response.set(7, Utc::now().format("%m%d%H%M%S").to_string());
    if let Some(stan) = original.and_then(|m| m.get(11).ok()).filter(|s| !s.is_empty()) {
        let _ = response.set(11, stan);
    }
    let _ = response.set(39, rc);
    response
}

async fn send_framed(stream: &mut TcpStream, tpdu: &Option<Tpdu>, iso_bytes: &[u8]) {
    let t = tpdu.unwrap_or(Tpdu { dst: [0, 0], src: [0, 0] });
    let mut payload = Vec::with_capacity(5 + iso_bytes.len());
    payload.push(0x60);
    payload.extend_from_slice(&t.src);
    payload.extend_from_slice(&t.dst);
    payload.extend_from_slice(iso_bytes);

    if let Err(e) = frame::write_frame(stream, &payload).await {
        warn!(error = %e, "failed to write terminal frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_flips_originator_digit() {
        let mut original = Message::new("0200");
        original.set(11, "000045").unwrap();
        let response = build_error_response(Some(&original), "12");
        assert_eq!(response.mti(), "0210");
        assert_eq!(response.get(11).unwrap(), "000045");
        assert_eq!(response.get(39).unwrap(), "12");
    }

    #[test]
    fn error_response_leaves_already_response_mti_untouched() {
        let original = Message::new("0210");
        let response = build_error_response(Some(&original), "96");
        assert_eq!(response.mti(), "0210");
    }

    #[test]
    fn error_response_on_missing_original_uses_synthetic_mti() {
        let response = build_error_response(None, "30");
        assert_eq!(response.mti(), "0000");
        assert!(response.get(11).is_err());
        assert_eq!(response.get(39).unwrap(), "30");
    }

    #[test]
    fn reversal_mti_selection_picks_0420_without_prior_advice() {
        let mut m = Message::new("0400");
        m.set(11, "000045").unwrap();
        assert_eq!(m.mti(), "0400");
        m.set_mti("0420");
        assert_eq!(m.mti(), "0420");
    }
}

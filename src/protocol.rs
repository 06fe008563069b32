//! LA66 protocol driver.
//!
//! Implements the AT command/response exchanges against a Dragino LA66
//! LoRaWAN modem: plain queries, the network-join wait, confirmed and
//! unconfirmed uplink transmission with downlink retrieval, and network
//! time synchronization. All waits are bounded polls; every operation
//! resolves to exactly one outcome.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, info, warn};
use serialport::SerialPort;
use std::thread;
use std::time::{Duration, Instant};

use crate::constants::*;
use crate::error::{La66Error, Result};
use crate::transport::{LineTransport, ModemPort, Poller};
use crate::types::{AtToken, Downlink};

/// Timeout budgets and protocol pauses.
///
/// Defaults match the LA66 reference timings; tests substitute shorter ones.
#[derive(Debug, Clone)]
pub struct Timeouts {
    /// Budget for a plain command query
    pub command: Duration,
    /// Budget for the initial network join
    pub join: Duration,
    /// Budget for an unconfirmed transmission
    pub transmit: Duration,
    /// Budget for a confirmed transmission, covering retries by the modem
    pub transmit_confirmed: Duration,
    /// Settle delay after writing a command
    pub send_settle: Duration,
    /// Pause after `txDone` while the first receive window opens
    pub tx_window: Duration,
    /// Pause before the second receive window opens
    pub rx2_window: Duration,
    /// Settle delay after `rxDone` before querying the payload
    pub rx_settle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            command: Duration::from_secs(10),
            join: Duration::from_secs(600),
            transmit: Duration::from_secs(10),
            transmit_confirmed: Duration::from_secs(60),
            send_settle: Duration::from_millis(10),
            tx_window: Duration::from_secs(1),
            rx2_window: Duration::from_secs(2),
            rx_settle: Duration::from_millis(100),
        }
    }
}

/// Receive stages of the staged uplink exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReceiveStage {
    WaitForOk,
    WaitForTx,
    WaitForRx,
    WaitForRx2,
    WaitForSyncTimeOk,
}

/// Main LA66 protocol interface
pub struct La66<P: ModemPort> {
    link: LineTransport<P>,
    timeouts: Timeouts,
}

impl La66<Box<dyn SerialPort>> {
    /// Open a serial port and attach to the modem behind it.
    pub fn open(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, BAUD_RATE)
            .timeout(CHAR_TIMEOUT)
            .open()?;

        Ok(La66::new(port))
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }
}

impl<P: ModemPort> La66<P> {
    /// Create a driver over an already-open port with default timeouts.
    pub fn new(port: P) -> Self {
        La66::with_timeouts(port, Timeouts::default())
    }

    pub fn with_timeouts(port: P, timeouts: Timeouts) -> Self {
        La66 {
            link: LineTransport::new(port),
            timeouts,
        }
    }

    #[cfg(test)]
    pub(crate) fn port_mut(&mut self) -> &mut P {
        self.link.port_mut()
    }

    /// Reset the modem by toggling its reset line.
    pub fn reset(&mut self) -> Result<()> {
        self.deactivate()?;
        self.activate()
    }

    /// Release the reset line and wait for the module to boot.
    pub fn activate(&mut self) -> Result<()> {
        self.link.port_mut().set_reset(true)?;
        thread::sleep(RESET_SETTLE);
        Ok(())
    }

    /// Hold the module in reset.
    pub fn deactivate(&mut self) -> Result<()> {
        self.link.port_mut().set_reset(false)?;
        thread::sleep(RESET_HOLD);
        Ok(())
    }

    /// Send a command without reading a response.
    ///
    /// The trailing CRLF is mandatory and easy to forget; a command without
    /// it is rejected before anything is written.
    fn send_command(&mut self, command: &str) -> Result<()> {
        if !command.ends_with("\r\n") {
            return Err(La66Error::Param);
        }

        debug!("sending command: {}", command.trim_end());

        // clear the receive buffer just in case
        self.link.clear()?;
        self.link.write(command)?;
        thread::sleep(self.timeouts.send_settle);

        Ok(())
    }

    /// Send a command and return its response line.
    ///
    /// The first line is matched against the modem error tokens; anything
    /// else is kept as the response and the call completes once the `OK`
    /// sentinel arrives. Chatter between response and `OK` is discarded.
    pub fn query_command(&mut self, command: &str) -> Result<String> {
        self.send_command(command)?;

        let mut poller = Poller::new(self.timeouts.command, POLL_INTERVAL);
        let response = loop {
            if let Some(line) = self.link.poll_line()? {
                break line;
            }
            if !poller.tick() {
                return Err(La66Error::Panic);
            }
        };

        match AtToken::classify(&response) {
            AtToken::Error => return Err(La66Error::Modem),
            AtToken::ParamError => return Err(La66Error::Param),
            AtToken::BusyError => return Err(La66Error::Busy),
            AtToken::NoNetJoined => return Err(La66Error::Join),
            _ => {}
        }

        let mut poller = Poller::new(self.timeouts.command, POLL_INTERVAL);
        loop {
            while let Some(line) = self.link.poll_line()? {
                if AtToken::classify(&line) == AtToken::Ok {
                    return Ok(response);
                }
            }
            if !poller.tick() {
                return Err(La66Error::Panic);
            }
        }
    }

    /// Wait for the modem to join the network.
    ///
    /// The modem announces the join on its own once activated; this polls
    /// for the notification within the join budget. The optional heartbeat
    /// runs once per second after the first line has been seen, so a caller
    /// can signal liveness without touching protocol state.
    pub fn wait_for_join(&mut self, mut heartbeat: Option<&mut dyn FnMut()>) -> Result<()> {
        let mut poller = Poller::new(self.timeouts.join, POLL_INTERVAL);
        let mut seen_line = false;
        let mut last_beat = Instant::now();

        loop {
            while let Some(line) = self.link.poll_line()? {
                seen_line = true;
                if AtToken::classify(&line) == AtToken::Joined {
                    info!("joined network");
                    return Ok(());
                }
            }

            if seen_line {
                if let Some(beat) = heartbeat.as_mut() {
                    if last_beat.elapsed() >= JOIN_HEARTBEAT {
                        beat();
                        last_beat = Instant::now();
                    }
                }
            }

            if !poller.tick() {
                warn!("unable to join network, timeout reached");
                return Err(La66Error::Join);
            }
        }
    }

    /// Transmit an application payload, optionally confirmed.
    ///
    /// Returns the downlink delivered in a receive window, or `None` when
    /// the transmission completed without one.
    pub fn transmit(&mut self, fport: u8, confirm: bool, payload: &[u8]) -> Result<Option<Downlink>> {
        let hex_payload = hex::encode_upper(payload);
        if hex_payload.len() > MAX_LINE {
            return Err(La66Error::BufferExhausted);
        }

        // Command format: AT+SENDB=<confirm>,<fPort>,<data_len>,<data>,
        // example AT+SENDB=00,2,8,05820802581EA0A5
        let command = format!(
            "AT+SENDB=0{},{},{},{}\r\n",
            confirm as u8,
            fport,
            payload.len(),
            hex_payload
        );
        self.send_command(&command)?;

        let budget = if confirm {
            self.timeouts.transmit_confirmed
        } else {
            self.timeouts.transmit
        };

        if self.receive_stages(budget, confirm, ReceiveStage::WaitForRx)? {
            thread::sleep(self.timeouts.rx_settle);
            self.fetch_downlink().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Request network time from the server.
    ///
    /// Runs the same staged exchange as a transmission, but terminates on
    /// the modem's sync notification instead of a receive window.
    pub fn sync_time(&mut self) -> Result<()> {
        self.send_command("AT+DEVICETIMEREQ=1\r\n")?;

        self.receive_stages(self.timeouts.transmit, false, ReceiveStage::WaitForSyncTimeOk)?;
        Ok(())
    }

    /// Drive the staged receive loop shared by `transmit` and `sync_time`.
    ///
    /// `terminal` selects the stage entered after `txDone`: the receive
    /// windows for a transmission, or the sync-ok wait. Returns `true` when
    /// a downlink is pending, `false` when the exchange completed without
    /// one.
    fn receive_stages(
        &mut self,
        budget: Duration,
        confirm: bool,
        terminal: ReceiveStage,
    ) -> Result<bool> {
        let mut poller = Poller::new(budget, POLL_INTERVAL);
        let mut stage = ReceiveStage::WaitForOk;

        loop {
            if let Some(line) = self.link.poll_line()? {
                match stage {
                    ReceiveStage::WaitForOk => match AtToken::classify(&line) {
                        AtToken::Error => return Err(La66Error::Modem),
                        AtToken::ParamError => return Err(La66Error::Param),
                        AtToken::BusyError => return Err(La66Error::Busy),
                        AtToken::NoNetJoined => return Err(La66Error::Join),
                        AtToken::Ok => stage = ReceiveStage::WaitForTx,
                        _ => {}
                    },
                    ReceiveStage::WaitForTx => {
                        if AtToken::classify(&line) == AtToken::TxDone {
                            stage = terminal;
                            if stage == ReceiveStage::WaitForRx {
                                thread::sleep(self.timeouts.tx_window);
                            }
                        }
                    }
                    ReceiveStage::WaitForRx | ReceiveStage::WaitForRx2 => {
                        match AtToken::classify(&line) {
                            AtToken::RxDone => return Ok(true),
                            AtToken::RxTimeout => {
                                if confirm {
                                    // the modem keeps retrying on its own,
                                    // the longer confirmed budget governs
                                } else if stage == ReceiveStage::WaitForRx {
                                    stage = ReceiveStage::WaitForRx2;
                                    thread::sleep(self.timeouts.rx2_window);
                                } else {
                                    return Ok(false);
                                }
                            }
                            _ => {}
                        }
                    }
                    ReceiveStage::WaitForSyncTimeOk => {
                        if AtToken::classify(&line) == AtToken::SyncTimeOk {
                            info!("network time synchronized");
                            return Ok(false);
                        }
                    }
                }
            } else if !poller.tick() {
                return Err(La66Error::Panic);
            }
        }
    }

    /// Retrieve and decode the pending downlink.
    ///
    /// The response format is `<port>:<hex-payload>`; anything else means
    /// the link is desynchronized.
    fn fetch_downlink(&mut self) -> Result<Downlink> {
        let response = self.query_command("AT+RECVB=?\r\n")?;

        let (port, data) = response.split_once(':').ok_or(La66Error::Panic)?;
        let port = port.trim().parse::<u8>().map_err(|_| La66Error::Panic)?;
        let data = hex::decode(data.trim()).map_err(|_| La66Error::Panic)?;

        debug!("downlink on port {}: {} bytes", port, data.len());
        Ok(Downlink { port, data })
    }

    /// Current data rate
    pub fn data_rate(&mut self) -> Result<u8> {
        let response = self.query_command("AT+DR=?\r\n")?;
        response
            .trim()
            .parse()
            .map_err(|_| La66Error::Parse(format!("invalid data rate: {}", response)))
    }

    /// RX1 window delay in ms
    pub fn rx1_delay(&mut self) -> Result<u16> {
        let response = self.query_command("AT+RX1DL=?\r\n")?;
        response
            .trim()
            .parse()
            .map_err(|_| La66Error::Parse(format!("invalid RX1 delay: {}", response)))
    }

    /// RX2 window delay in ms
    pub fn rx2_delay(&mut self) -> Result<u16> {
        let response = self.query_command("AT+RX2DL=?\r\n")?;
        response
            .trim()
            .parse()
            .map_err(|_| La66Error::Parse(format!("invalid RX2 delay: {}", response)))
    }

    /// Local time as reported by the modem, valid after a time sync.
    ///
    /// Response format: `21h 32m 52s on 12/01/2021`, optionally prefixed
    /// with `LTIME:`.
    pub fn local_time(&mut self) -> Result<DateTime<Utc>> {
        let response = self.query_command("AT+LTIME=?\r\n")?;
        let text = response.trim().trim_start_matches("LTIME:").trim();

        NaiveDateTime::parse_from_str(text, "%Hh %Mm %Ss on %m/%d/%Y")
            .map(|naive| naive.and_utc())
            .map_err(|_| La66Error::Parse(format!("invalid local time: {}", response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testutil::MockPort;

    /// Short budgets so timeout paths resolve in fractions of a second.
    fn fast_timeouts() -> Timeouts {
        Timeouts {
            command: Duration::from_millis(200),
            join: Duration::from_millis(150),
            transmit: Duration::from_millis(200),
            transmit_confirmed: Duration::from_millis(400),
            send_settle: Duration::from_millis(1),
            tx_window: Duration::from_millis(1),
            rx2_window: Duration::from_millis(1),
            rx_settle: Duration::from_millis(1),
        }
    }

    fn driver(port: MockPort) -> La66<MockPort> {
        La66::with_timeouts(port, fast_timeouts())
    }

    #[test]
    fn test_send_command_requires_terminator() {
        let mut la66 = driver(MockPort::new());

        let err = la66.send_command("AT+DR=?").unwrap_err();
        assert!(matches!(err, La66Error::Param));
        // nothing may reach the modem on a malformed command
        assert!(la66.port_mut().tx.is_empty());
    }

    #[test]
    fn test_query_command_returns_first_line() {
        let mut la66 = driver(MockPort::script(&[&["5", "OK"]]));

        let response = la66.query_command("AT+DR=?\r\n").unwrap();
        assert_eq!(response, "5");
        assert_eq!(la66.port_mut().sent(), "AT+DR=?\r\n");
    }

    #[test]
    fn test_query_command_discards_chatter_before_ok() {
        let mut la66 = driver(MockPort::script(&[&["25000", "noise", "OK"]]));

        assert_eq!(la66.query_command("AT+RECVB=?\r\n").unwrap(), "25000");
    }

    #[test]
    fn test_query_command_error_tokens_short_circuit() {
        let cases = [
            ("AT_ERROR", La66Error::Modem),
            ("AT_PARAM_ERROR", La66Error::Param),
            ("AT_BUSY_ERROR", La66Error::Busy),
            ("AT_NO_NET_JOINED", La66Error::Join),
        ];

        for (token, expected) in cases {
            let mut la66 = driver(MockPort::script(&[&[token]]));
            let started = Instant::now();
            let err = la66.query_command("AT+DR=?\r\n").unwrap_err();
            assert_eq!(err.code(), expected.code(), "token {}", token);
            // a matched error token must not wait out the budget
            assert!(started.elapsed() < Duration::from_millis(100));
        }
    }

    #[test]
    fn test_query_command_times_out_to_panic() {
        let mut la66 = driver(MockPort::new());

        let err = la66.query_command("AT+DR=?\r\n").unwrap_err();
        assert!(matches!(err, La66Error::Panic));
    }

    #[test]
    fn test_query_command_missing_ok_is_panic() {
        let mut la66 = driver(MockPort::script(&[&["5"]]));

        let err = la66.query_command("AT+DR=?\r\n").unwrap_err();
        assert!(matches!(err, La66Error::Panic));
    }

    #[test]
    fn test_join_success() {
        let mut la66 = driver(MockPort::with_lines(&["boot noise", "JOINED"]));
        assert!(la66.wait_for_join(None).is_ok());
    }

    #[test]
    fn test_join_timeout() {
        let mut la66 = driver(MockPort::with_lines(&["still trying"]));

        let err = la66.wait_for_join(None).unwrap_err();
        assert!(matches!(err, La66Error::Join));
    }

    #[test]
    fn test_transmit_unconfirmed_command_format() {
        let mut la66 = driver(MockPort::script(&[&[
            "OK", "txDone", "rxTimeout", "rxTimeout",
        ]]));

        la66.transmit(2, false, &[0x05, 0x82, 0x08, 0x02]).unwrap();
        assert_eq!(la66.port_mut().sent(), "AT+SENDB=00,2,4,05820802\r\n");
    }

    #[test]
    fn test_transmit_two_rx_timeouts_mean_no_downlink() {
        let mut la66 = driver(MockPort::script(&[&[
            "OK", "txDone", "rxTimeout", "rxTimeout",
        ]]));

        let downlink = la66.transmit(1, false, &[0x01]).unwrap();
        assert_eq!(downlink, None);
        // no RECVB query may be issued without a downlink
        assert!(!la66.port_mut().sent().contains("AT+RECVB"));
    }

    #[test]
    fn test_transmit_rx_done_fetches_downlink() {
        let mut la66 = driver(MockPort::script(&[
            &["OK", "txDone", "rxDone"],
            &["2:0A0B", "OK"],
        ]));

        let downlink = la66.transmit(1, false, &[0x01]).unwrap().unwrap();
        assert_eq!(downlink.port, 2);
        assert_eq!(downlink.data, vec![0x0A, 0x0B]);
        assert!(la66.port_mut().sent().contains("AT+RECVB=?\r\n"));
    }

    #[test]
    fn test_transmit_second_window_downlink() {
        let mut la66 = driver(MockPort::script(&[
            &["OK", "txDone", "rxTimeout", "rxDone"],
            &["1:FF01", "OK"],
        ]));

        let downlink = la66.transmit(1, false, &[0x02]).unwrap().unwrap();
        assert_eq!(downlink.data, vec![0xFF, 0x01]);
    }

    #[test]
    fn test_transmit_confirmed_ignores_rx_timeouts() {
        let mut la66 = driver(MockPort::script(&[
            &["OK", "txDone", "rxTimeout", "rxTimeout", "rxTimeout", "rxDone"],
            &["0:", "OK"],
        ]));

        let downlink = la66.transmit(1, true, &[0x03]).unwrap().unwrap();
        assert_eq!(downlink.port, 0);
        assert!(downlink.data.is_empty());
        assert!(la66.port_mut().sent().starts_with("AT+SENDB=01,1,1,03\r\n"));
    }

    #[test]
    fn test_transmit_confirmed_budget_exhaustion_is_panic() {
        let mut la66 = driver(MockPort::script(&[&["OK", "txDone", "rxTimeout"]]));

        let err = la66.transmit(1, true, &[0x03]).unwrap_err();
        assert!(matches!(err, La66Error::Panic));
    }

    #[test]
    fn test_transmit_error_token_terminates() {
        let mut la66 = driver(MockPort::script(&[&["AT_BUSY_ERROR"]]));

        let err = la66.transmit(1, false, &[0x04]).unwrap_err();
        assert!(matches!(err, La66Error::Busy));
    }

    #[test]
    fn test_transmit_ignores_unknown_lines_between_stages() {
        let mut la66 = driver(MockPort::script(&[&[
            "some banner",
            "OK",
            "chatter",
            "txDone",
            "rxTimeout",
            "rxTimeout",
        ]]));

        assert_eq!(la66.transmit(1, false, &[0x05]).unwrap(), None);
    }

    #[test]
    fn test_transmit_oversized_payload_is_buffer_exhausted() {
        let mut la66 = driver(MockPort::new());

        let payload = vec![0u8; MAX_LINE / 2 + 1];
        let err = la66.transmit(1, false, &payload).unwrap_err();
        assert!(matches!(err, La66Error::BufferExhausted));
        assert!(la66.port_mut().tx.is_empty());
    }

    #[test]
    fn test_malformed_recvb_is_panic() {
        let mut la66 = driver(MockPort::script(&[
            &["OK", "txDone", "rxDone"],
            &["no colon here", "OK"],
        ]));

        let err = la66.transmit(1, false, &[0x06]).unwrap_err();
        assert!(matches!(err, La66Error::Panic));
    }

    #[test]
    fn test_bad_hex_in_recvb_is_panic() {
        let mut la66 = driver(MockPort::script(&[
            &["OK", "txDone", "rxDone"],
            &["2:ZZZZ", "OK"],
        ]));

        let err = la66.transmit(1, false, &[0x07]).unwrap_err();
        assert!(matches!(err, La66Error::Panic));
    }

    #[test]
    fn test_sync_time_staged_sequence() {
        let mut la66 = driver(MockPort::script(&[&["OK", "txDone", "Sync time ok"]]));

        assert!(la66.sync_time().is_ok());
        assert_eq!(la66.port_mut().sent(), "AT+DEVICETIMEREQ=1\r\n");
    }

    #[test]
    fn test_sync_time_without_ack_is_panic() {
        let mut la66 = driver(MockPort::script(&[&["OK", "txDone"]]));

        let err = la66.sync_time().unwrap_err();
        assert!(matches!(err, La66Error::Panic));
    }

    #[test]
    fn test_data_rate_parse() {
        let mut la66 = driver(MockPort::script(&[&["5", "OK"]]));
        assert_eq!(la66.data_rate().unwrap(), 5);
    }

    #[test]
    fn test_local_time_parse() {
        let mut la66 = driver(MockPort::script(&[&[
            "LTIME:21h 32m 52s on 12/01/2021",
            "OK",
        ]]));

        let time = la66.local_time().unwrap();
        assert_eq!(time.to_rfc3339(), "2021-12-01T21:32:52+00:00");
    }
}

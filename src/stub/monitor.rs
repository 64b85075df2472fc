//! `qRcmd` ("monitor") command handling.

use std::time::Duration;

use crate::conn::Connection;
use crate::protocol::hex;
use crate::stub::error::RspCode;
use crate::stub::Error;
use crate::stub::GdbServer;
use crate::target::Target;

const HELP_TEXT: &str = "\
monitor commands:\n\
  help               show this text\n\
  reset              reset the target\n\
  timeout [seconds]  show or set the continue timeout (0 disables)\n\
  echo <text>        echo text back\n";

impl<T: Target, C: Connection> GdbServer<T, C> {
    /// `qRcmd,<hex>` — decode and run a monitor command.
    pub(super) fn handle_rcmd(&mut self) -> Result<(), Error<C::Error>> {
        const PREFIX: usize = b"qRcmd,".len();

        let payload = &mut self.pkt.bytes_mut()[PREFIX..];
        let decoded = hex::decode_hex_buf(payload).ok_or(Error::rsp(RspCode::Proto))?;
        let cmd = core::str::from_utf8(decoded)
            .map_err(|_| Error::rsp(RspCode::Proto))?
            .trim()
            .to_owned();
        debug!("monitor command: {:?}", cmd);

        let mut words = cmd.split_whitespace();
        match words.next() {
            Some("help") | None => {
                self.console_write(HELP_TEXT)?;
                self.send_ok()
            }
            Some("reset") => {
                self.reset_target();
                self.send_ok()
            }
            Some("timeout") => match words.next() {
                None => {
                    let secs = self.timeout.as_secs();
                    self.console_write(&format!("continue timeout: {} s\n", secs))?;
                    self.send_ok()
                }
                Some(arg) => match arg.parse::<u64>() {
                    Ok(secs) => {
                        self.timeout = Duration::from_secs(secs);
                        self.send_ok()
                    }
                    Err(_) => {
                        self.console_write("timeout wants a decimal second count\n")?;
                        self.send_error(RspCode::Proto as u8)
                    }
                },
            },
            Some("echo") => {
                let rest = cmd.strip_prefix("echo").unwrap_or("").trim_start();
                self.console_write(&format!("{}\n", rest))?;
                self.send_ok()
            }
            Some(other) => {
                self.console_write(&format!("unrecognised monitor command: {}\n", other))?;
                self.send_error(RspCode::Unsupported as u8)
            }
        }
    }

    /// Push `O<hex>` console-output packets at the client, chunked to fit
    /// the packet buffer. GDB prints these while the monitor command is in
    /// progress.
    fn console_write(&mut self, text: &str) -> Result<(), Error<C::Error>> {
        // the 'O' marker plus two digits per byte must fit
        let budget = (self.pkt.capacity() - 1) / 2;
        for chunk in text.as_bytes().chunks(budget) {
            self.pkt.clear();
            self.pkt.push(b'O')?;
            self.pkt.put_hex_buf(chunk)?;
            self.send_reply()?;
            if self.disconnect.is_some() {
                break;
            }
        }
        Ok(())
    }
}

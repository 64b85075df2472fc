mod tcpstream;
#[cfg(unix)]
mod unixstream;

use crate::{
    request::{Dispatch, Time},
    request_log::RequestLog,
    stats::{RequestKind, ThreadStats},
};

use log::{debug, warn};
use std::{
    fmt::Write as _,
    io::{self, BufRead, BufReader, Read, Write},
    time::Duration,
};

/// What a worker calls for every dequeued request.
///
/// The connection belongs to the calling worker for the duration of the call
/// and is closed by the worker afterwards. Anything the handler wants to
/// report goes into `stats` or `log`; the pool ignores the outcome.
pub trait RequestHandler<C>: Send + Sync {
    fn handle(
        &self,
        connection: &mut C,
        arrival: Time,
        dispatch: Dispatch,
        stats: &mut ThreadStats,
        log: &RequestLog,
    );
}

impl<C, F> RequestHandler<C> for F
where
    F: Fn(&mut C, Time, Dispatch, &mut ThreadStats, &RequestLog) + Send + Sync,
{
    fn handle(
        &self,
        connection: &mut C,
        arrival: Time,
        dispatch: Dispatch,
        stats: &mut ThreadStats,
        log: &RequestLog,
    ) {
        self(connection, arrival, dispatch, stats, log)
    }
}

const MAX_HEAD_LINES: usize = 100;
const MAX_LINE_BYTES: u64 = 8 * 1024;

/// Minimal HTTP/1.0 front end.
///
/// `GET` answers with the worker's statistics and appends the same block to
/// the log, `POST` answers with the whole log. Only the request line is
/// looked at; headers are read and thrown away.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatsHandler;

impl StatsHandler {
    pub fn new() -> Self {
        Self
    }

    fn respond<C: Read + Write>(
        connection: &mut C,
        arrival: Time,
        dispatch: Dispatch,
        stats: &mut ThreadStats,
        log: &RequestLog,
    ) -> io::Result<()> {
        // An unreadable head is answered like an empty request line.
        let request_line = read_request_line(connection).unwrap_or_else(|err| {
            debug!("worker {} could not read request: {err}", stats.id());
            String::new()
        });
        let mut words = request_line.split_whitespace();
        let (method, target) = (words.next(), words.next());
        debug!("worker {} got {request_line:?}", stats.id());

        let kind = match (method, target) {
            (Some("GET"), Some(target)) if target.contains(".cgi") => RequestKind::Dynamic,
            (Some("GET"), Some(_)) => RequestKind::Static,
            (Some("POST"), Some(_)) => RequestKind::Post,
            _ => RequestKind::Other,
        };
        stats.record(kind);
        let headers = stat_headers(arrival, dispatch, stats);

        let (status, body) = match kind {
            RequestKind::Static | RequestKind::Dynamic => {
                // Failing to log never fails the request.
                if let Err(err) = log.append(format!("{headers}\r\n").as_bytes()) {
                    warn!("dropped log entry: {err}");
                }
                ("200 OK", Vec::new())
            }
            RequestKind::Post => ("200 OK", log.snapshot()),
            RequestKind::Other if target.is_some() => {
                ("501 Not Implemented", b"method not implemented\n".to_vec())
            }
            RequestKind::Other => ("400 Bad Request", b"malformed request\n".to_vec()),
        };

        write!(
            connection,
            "HTTP/1.0 {status}\r\n\
             Server: poolsrv\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: {}\r\n\
             {headers}\r\n",
            body.len()
        )?;
        connection.write_all(&body)?;
        connection.flush()
    }
}

impl<C: Read + Write> RequestHandler<C> for StatsHandler {
    fn handle(
        &self,
        connection: &mut C,
        arrival: Time,
        dispatch: Dispatch,
        stats: &mut ThreadStats,
        log: &RequestLog,
    ) {
        if let Err(err) = Self::respond(connection, arrival, dispatch, stats, log) {
            warn!("worker {} failed to serve request: {err}", stats.id());
        }
    }
}

/// Reads the request head and keeps only its first line.
///
/// Fails on lines longer than `MAX_LINE_BYTES` and on a request line that is
/// not UTF-8.
fn read_request_line<C: Read>(connection: &mut C) -> io::Result<String> {
    let mut reader = BufReader::new(connection);
    let mut line = Vec::new();
    read_bounded_line(&mut reader, &mut line)?;
    let request_line = String::from_utf8(line)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

    let mut header = Vec::new();
    for _ in 0..MAX_HEAD_LINES {
        let read = read_bounded_line(&mut reader, &mut header)?;
        if read == 0 || header.iter().all(u8::is_ascii_whitespace) {
            break;
        }
    }
    Ok(request_line.trim_end().to_owned())
}

fn read_bounded_line<R: BufRead>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<usize> {
    line.clear();
    let read = reader.by_ref().take(MAX_LINE_BYTES).read_until(b'\n', line)?;
    if read as u64 == MAX_LINE_BYTES && line.last() != Some(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {MAX_LINE_BYTES} bytes"),
        ));
    }
    Ok(read)
}

fn timeval(secs: i64, micros: u32) -> String {
    format!("{secs}.{micros:06}")
}

fn elapsed_timeval(elapsed: chrono::TimeDelta) -> String {
    let elapsed = elapsed.to_std().unwrap_or(Duration::ZERO);
    timeval(
        i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        elapsed.subsec_micros(),
    )
}

/// The `Stat-*` header block, each line CRLF-terminated.
pub fn stat_headers(arrival: Time, dispatch: Dispatch, stats: &ThreadStats) -> String {
    let mut block = String::new();
    let lines = [
        (
            "Req-Arrival",
            timeval(arrival.timestamp(), arrival.timestamp_subsec_micros()),
        ),
        ("Req-Dispatch", elapsed_timeval(dispatch.elapsed)),
        ("Thread-Id", stats.id().to_string()),
        ("Thread-Count", stats.total_requests.to_string()),
        ("Thread-Static", stats.static_requests.to_string()),
        ("Thread-Dynamic", stats.dynamic_requests.to_string()),
        ("Thread-Post", stats.post_requests.to_string()),
    ];
    for (name, value) in lines {
        let _ = write!(block, "Stat-{name}:: {value}\r\n");
    }
    block
}

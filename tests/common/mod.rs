//! In-process backend speaking just enough of the PostgreSQL wire protocol
//! for the driver tests. Query texts are matched against a fixed set of
//! scripted plans.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pgprep::Opts;
use pgprep::tokio::{Conn, Stream};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

pub const BOOL: u32 = 16;
pub const INT2: u32 = 21;
pub const INT4: u32 = 23;
pub const TEXT: u32 = 25;
pub const UNKNOWN: u32 = 705;
pub const VOID: u32 = 2278;
pub const INT4_ARRAY: u32 = 1007;

pub const LARGE: usize = 100_000;

/// How long `select torn_row()` pauses in the middle of its DataRow.
pub const TORN_ROW_PAUSE: Duration = Duration::from_millis(300);

/// Text value of `select torn_row()`: a complete, well-formed response to a
/// different query, so a reader that loses its place in the frame would
/// accept it as real messages.
pub fn forged_frames() -> String {
    let mut row = 1_i16.to_be_bytes().to_vec();
    row.extend_from_slice(&5_i32.to_be_bytes());
    row.extend_from_slice(b"pwned");

    let mut bytes = ready(b'I');
    bytes.extend(message(b'2', &[]));
    bytes.extend(message(b'D', &row));
    bytes.extend(command_complete("SELECT 1"));
    bytes.extend(ready(b'I'));
    String::from_utf8(bytes).unwrap()
}

/// What the backend observed.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Statement names in Parse order
    pub parsed: Vec<String>,
    /// Statement names in Close order
    pub closed: Vec<String>,
    /// Prepared statements currently alive on the server
    pub live: usize,
    pub executed: usize,
    pub simple_queries: Vec<String>,
    pub terminated: bool,
}

pub struct Backend {
    pub stats: Arc<Mutex<ServerStats>>,
    task: JoinHandle<()>,
}

impl Backend {
    /// Wait for the server side to see the end of the session.
    pub async fn finished(self) -> Arc<Mutex<ServerStats>> {
        self.task.await.unwrap();
        self.stats
    }
}

pub fn connect(opts: Opts) -> (Conn, Backend) {
    let (client, server) = tokio::io::duplex(1 << 20);
    let stats = Arc::new(Mutex::new(ServerStats::default()));
    let task = tokio::spawn(serve(server, Arc::clone(&stats)));
    (
        Conn::from_stream(Stream::new(client), opts),
        Backend { stats, task },
    )
}

pub fn connect_default() -> (Conn, Backend) {
    connect(Opts::default())
}

pub fn cache_opts(statement_cache_size: usize) -> Opts {
    Opts {
        statement_cache_size,
        ..Opts::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Cell {
    Null,
    Int(i64),
    Bool(bool),
    Text(String),
}

enum Outcome {
    Rows(Vec<Vec<Cell>>, String),
    Error(&'static str, String),
    /// Never answer; keep reading until the client goes away.
    Hang,
    /// Reply with a message type that does not exist.
    Garbage,
}

#[derive(Clone)]
struct Plan {
    params: Vec<u32>,
    columns: Vec<(&'static str, u32)>,
    notify: bool,
    /// Send this many bytes of the Execute response, pause, then the rest
    split_at: Option<usize>,
    /// Stop reading from the client once this statement has been synced
    deafen: bool,
    run: Arc<dyn Fn(&[Cell]) -> Outcome + Send + Sync>,
}

impl Plan {
    fn new(
        params: Vec<u32>,
        columns: Vec<(&'static str, u32)>,
        run: impl Fn(&[Cell]) -> Outcome + Send + Sync + 'static,
    ) -> Self {
        Self {
            params,
            columns,
            notify: false,
            split_at: None,
            deafen: false,
            run: Arc::new(run),
        }
    }
}

fn select(rows: Vec<Vec<Cell>>) -> Outcome {
    let tag = format!("SELECT {}", rows.len());
    Outcome::Rows(rows, tag)
}

fn plan_for(query: &str) -> Result<Plan, (&'static str, String)> {
    let q = query.trim().to_ascii_lowercase();

    if q == "select a" {
        return Err(("42703", "column \"a\" does not exist".into()));
    }
    if let Some(n) = q.strip_prefix("select ").and_then(|n| n.parse::<i64>().ok()) {
        return Ok(Plan::new(vec![], vec![("?column?", INT4)], move |_| {
            select(vec![vec![Cell::Int(n)]])
        }));
    }
    if let Some(rest) = q.strip_prefix("select generate_series(0, ") {
        let n: i64 = rest.trim_end_matches(')').parse().map_err(|_| ("42601", q.clone()))?;
        return Ok(Plan::new(vec![], vec![("generate_series", INT4)], move |_| {
            select((0..=n).map(|i| vec![Cell::Int(i)]).collect())
        }));
    }
    if q.starts_with("select pg_sleep(") {
        return Ok(Plan::new(vec![], vec![("pg_sleep", VOID)], |_| Outcome::Hang));
    }
    if q.starts_with("select garbage(") {
        return Ok(Plan::new(vec![], vec![("garbage", INT4)], |_| Outcome::Garbage));
    }
    if q.contains("raise exception") {
        return Ok(Plan::new(vec![], vec![], |_| {
            Outcome::Error("P0001", "x".repeat(LARGE))
        }));
    }
    if q == "select notify()" {
        let mut plan = Plan::new(vec![], vec![("notify", INT4)], |_| {
            select(vec![vec![Cell::Int(1)]])
        });
        plan.notify = true;
        return Ok(plan);
    }
    if q == "select torn_row()" {
        let mut plan = Plan::new(vec![], vec![("torn", TEXT)], |_| {
            select(vec![vec![Cell::Text(forged_frames())]])
        });
        // DataRow header, column count, value length and 4 bytes of the value
        plan.split_at = Some(5 + 2 + 4 + 4);
        return Ok(plan);
    }
    if q == "select deafen()" {
        let mut plan = Plan::new(vec![], vec![("deafen", INT4)], |_| {
            select(vec![vec![Cell::Int(1)]])
        });
        plan.deafen = true;
        return Ok(plan);
    }
    let plan = match q.as_str() {
        "select $1::smallint" => Plan::new(vec![INT2], vec![("int2", INT2)], |p| {
            select(vec![vec![p[0].clone()]])
        }),
        "select $1::int4 * 2" => Plan::new(vec![INT4], vec![("?column?", INT4)], |p| {
            let cell = match &p[0] {
                Cell::Int(n) => Cell::Int(n * 2),
                _ => Cell::Null,
            };
            select(vec![vec![cell]])
        }),
        "select 1 = $1 as test" => Plan::new(vec![INT4], vec![("test", BOOL)], |p| {
            let cell = match &p[0] {
                Cell::Int(n) => Cell::Bool(*n == 1),
                _ => Cell::Null,
            };
            select(vec![vec![cell]])
        }),
        "select case when $1::text is null then 'null' else $1::text end" => {
            Plan::new(vec![TEXT], vec![("text", TEXT)], |p| {
                let cell = match &p[0] {
                    Cell::Null => Cell::Text("NULL".into()),
                    other => other.clone(),
                };
                select(vec![vec![cell]])
            })
        }
        "select $1::text" => Plan::new(vec![TEXT], vec![("text", TEXT)], |p| {
            select(vec![vec![p[0].clone()]])
        }),
        "select 'test'" => Plan::new(vec![], vec![("?column?", UNKNOWN)], |_| {
            select(vec![vec![Cell::Text("test".into())]])
        }),
        "select '{1,2}'::int4[]" => Plan::new(vec![], vec![("int4", INT4_ARRAY)], |_| {
            select(vec![vec![Cell::Text("{1,2}".into())]])
        }),
        "select repeat('x', 100000)" => Plan::new(vec![], vec![("repeat", TEXT)], |_| {
            select(vec![vec![Cell::Text("x".repeat(LARGE))]])
        }),
        "select * from drifting" => Plan::new(vec![], vec![("a", INT4)], |_| {
            Outcome::Error("0A000", "cached plan must not change result type".into())
        }),
        "insert into t values ($1)" => Plan::new(vec![INT4], vec![], |_| {
            Outcome::Rows(vec![], "INSERT 0 1".into())
        }),
        _ => {
            return Err(("42601", format!("syntax error at or near \"{}\"", query)));
        }
    };
    Ok(plan)
}

// === framing ===

fn message(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

fn put_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

fn error_response(code: &str, text: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, value) in [(b'S', "ERROR"), (b'V', "ERROR"), (b'C', code), (b'M', text)] {
        body.push(field);
        put_cstr(&mut body, value);
    }
    body.push(0);
    message(b'E', &body)
}

fn ready(status: u8) -> Vec<u8> {
    message(b'Z', &[status])
}

fn command_complete(tag: &str) -> Vec<u8> {
    let mut body = Vec::new();
    put_cstr(&mut body, tag);
    message(b'C', &body)
}

fn format_for(formats: &[i16], idx: usize) -> i16 {
    match formats.len() {
        0 => 0,
        1 => formats[0],
        _ => formats[idx],
    }
}

fn row_description(columns: &[(&str, u32)], formats: &[i16]) -> Vec<u8> {
    let mut body = (columns.len() as i16).to_be_bytes().to_vec();
    for (idx, (name, oid)) in columns.iter().enumerate() {
        put_cstr(&mut body, name);
        body.extend_from_slice(&0_u32.to_be_bytes());
        body.extend_from_slice(&0_i16.to_be_bytes());
        body.extend_from_slice(&oid.to_be_bytes());
        body.extend_from_slice(&(-1_i16).to_be_bytes());
        body.extend_from_slice(&(-1_i32).to_be_bytes());
        body.extend_from_slice(&format_for(formats, idx).to_be_bytes());
    }
    message(b'T', &body)
}

fn encode_cell(cell: &Cell, oid: u32, format: i16) -> Option<Vec<u8>> {
    let bytes = match (cell, format) {
        (Cell::Null, _) => return None,
        (Cell::Int(n), 1) => match oid {
            INT2 => (*n as i16).to_be_bytes().to_vec(),
            INT4 => (*n as i32).to_be_bytes().to_vec(),
            _ => n.to_be_bytes().to_vec(),
        },
        (Cell::Bool(b), 1) => vec![u8::from(*b)],
        (Cell::Int(n), _) => n.to_string().into_bytes(),
        (Cell::Bool(b), _) => if *b { b"t".to_vec() } else { b"f".to_vec() },
        (Cell::Text(s), _) => s.clone().into_bytes(),
    };
    Some(bytes)
}

fn data_row(cells: &[Cell], columns: &[(&str, u32)], formats: &[i16]) -> Vec<u8> {
    let mut body = (cells.len() as i16).to_be_bytes().to_vec();
    for (idx, cell) in cells.iter().enumerate() {
        match encode_cell(cell, columns[idx].1, format_for(formats, idx)) {
            Some(bytes) => {
                body.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                body.extend_from_slice(&bytes);
            }
            None => body.extend_from_slice(&(-1_i32).to_be_bytes()),
        }
    }
    message(b'D', &body)
}

fn decode_param(oid: u32, format: i16, raw: Option<&[u8]>) -> Cell {
    let Some(raw) = raw else {
        return Cell::Null;
    };
    if format == 1 {
        match oid {
            INT2 => Cell::Int(i64::from(i16::from_be_bytes([raw[0], raw[1]]))),
            INT4 => Cell::Int(i64::from(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))),
            BOOL => Cell::Bool(raw[0] != 0),
            _ => Cell::Text(String::from_utf8(raw.to_vec()).unwrap()),
        }
    } else {
        let text = String::from_utf8(raw.to_vec()).unwrap();
        match oid {
            INT2 | INT4 => Cell::Int(text.parse().unwrap()),
            BOOL => Cell::Bool(text == "t"),
            _ => Cell::Text(text),
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn u8(&mut self) -> u8 {
        let (head, rest) = self.buf.split_at(1);
        self.buf = rest;
        head[0]
    }

    fn i16(&mut self) -> i16 {
        let (head, rest) = self.buf.split_at(2);
        self.buf = rest;
        i16::from_be_bytes([head[0], head[1]])
    }

    fn i32(&mut self) -> i32 {
        let (head, rest) = self.buf.split_at(4);
        self.buf = rest;
        i32::from_be_bytes([head[0], head[1], head[2], head[3]])
    }

    fn bytes(&mut self, len: usize) -> &'a [u8] {
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        head
    }

    fn cstr(&mut self) -> String {
        let end = self.buf.iter().position(|&b| b == 0).unwrap();
        let s = String::from_utf8(self.buf[..end].to_vec()).unwrap();
        self.buf = &self.buf[end + 1..];
        s
    }
}

async fn read_frontend(io: &mut DuplexStream) -> Option<(u8, Vec<u8>)> {
    let tag = io.read_u8().await.ok()?;
    let len = io.read_i32().await.ok()?;
    let mut body = vec![0; len as usize - 4];
    io.read_exact(&mut body).await.ok()?;
    Some((tag, body))
}

struct Portal {
    plan: Plan,
    params: Vec<Cell>,
    result_formats: Vec<i16>,
}

fn run_portal(portal: &Portal, out: &mut Vec<u8>) -> Result<(), Outcome> {
    if portal.plan.notify {
        let mut body = 7_u32.to_be_bytes().to_vec();
        put_cstr(&mut body, "jobs");
        put_cstr(&mut body, "ready");
        out.extend(message(b'A', &body));
    }
    match (portal.plan.run)(&portal.params) {
        Outcome::Rows(rows, tag) => {
            for row in &rows {
                out.extend(data_row(row, &portal.plan.columns, &portal.result_formats));
            }
            out.extend(command_complete(&tag));
            Ok(())
        }
        other => Err(other),
    }
}

async fn serve(mut io: DuplexStream, stats: Arc<Mutex<ServerStats>>) {
    let mut statements: HashMap<String, Plan> = HashMap::new();
    let mut portal: Option<Portal> = None;
    let mut failed = false;
    let mut hanging = false;
    let mut deaf = false;
    let mut txn = b'I';

    while let Some((tag, body)) = read_frontend(&mut io).await {
        if tag == b'X' {
            stats.lock().terminated = true;
            break;
        }
        if hanging || (failed && tag != b'S') {
            continue;
        }

        let mut r = Reader { buf: &body };
        let mut out = Vec::new();
        let mut split_at = None;
        match tag {
            b'P' => {
                let name = r.cstr();
                let query = r.cstr();
                match plan_for(&query) {
                    Ok(plan) => {
                        statements.insert(name.clone(), plan);
                        stats.lock().parsed.push(name);
                        out.extend(message(b'1', &[]));
                    }
                    Err((code, text)) => {
                        out.extend(error_response(code, &text));
                        failed = true;
                    }
                }
            }
            b'D' => {
                let _kind = r.u8();
                let name = r.cstr();
                match statements.get(&name) {
                    Some(plan) => {
                        let mut body = (plan.params.len() as i16).to_be_bytes().to_vec();
                        for oid in &plan.params {
                            body.extend_from_slice(&oid.to_be_bytes());
                        }
                        out.extend(message(b't', &body));
                        if plan.columns.is_empty() {
                            out.extend(message(b'n', &[]));
                        } else {
                            out.extend(row_description(&plan.columns, &[]));
                        }
                    }
                    None => {
                        out.extend(error_response("26000", "prepared statement does not exist"));
                        failed = true;
                    }
                }
            }
            b'B' => {
                let _portal = r.cstr();
                let name = r.cstr();
                let param_formats: Vec<i16> = (0..r.i16()).map(|_| r.i16()).collect();
                let count = r.i16() as usize;
                let mut raw_params = Vec::with_capacity(count);
                for _ in 0..count {
                    let len = r.i32();
                    raw_params.push((len >= 0).then(|| r.bytes(len as usize).to_vec()));
                }
                let result_formats: Vec<i16> = (0..r.i16()).map(|_| r.i16()).collect();
                match statements.get(&name) {
                    Some(plan) => {
                        let params = raw_params
                            .iter()
                            .enumerate()
                            .map(|(idx, raw)| {
                                decode_param(
                                    plan.params[idx],
                                    format_for(&param_formats, idx),
                                    raw.as_deref(),
                                )
                            })
                            .collect();
                        portal = Some(Portal {
                            plan: plan.clone(),
                            params,
                            result_formats,
                        });
                        out.extend(message(b'2', &[]));
                    }
                    None => {
                        out.extend(error_response("26000", "prepared statement does not exist"));
                        failed = true;
                    }
                }
            }
            b'E' => {
                stats.lock().executed += 1;
                if let Some(portal) = portal.take() {
                    split_at = portal.plan.split_at;
                    deaf |= portal.plan.deafen;
                    match run_portal(&portal, &mut out) {
                        Ok(()) => {}
                        Err(Outcome::Error(code, text)) => {
                            out.extend(error_response(code, &text));
                            failed = true;
                        }
                        Err(Outcome::Garbage) => out.extend(message(b'?', b"junk")),
                        Err(_) => hanging = true,
                    }
                }
            }
            b'S' => {
                failed = false;
                portal = None;
                out.extend(ready(txn));
            }
            b'C' => {
                let _kind = r.u8();
                let name = r.cstr();
                statements.remove(&name);
                stats.lock().closed.push(name);
                out.extend(message(b'3', &[]));
            }
            b'Q' => {
                let sql = r.cstr();
                stats.lock().simple_queries.push(sql.clone());
                for part in sql.split(';').map(str::trim).filter(|p| !p.is_empty()) {
                    match part.to_ascii_lowercase().as_str() {
                        "begin" => {
                            txn = b'T';
                            out.extend(command_complete("BEGIN"));
                            continue;
                        }
                        "commit" => {
                            txn = b'I';
                            out.extend(command_complete("COMMIT"));
                            continue;
                        }
                        _ => {}
                    }
                    match plan_for(part) {
                        Ok(plan) => {
                            if !plan.columns.is_empty() {
                                out.extend(row_description(&plan.columns, &[]));
                            }
                            let portal = Portal {
                                params: vec![Cell::Null; plan.params.len()],
                                plan,
                                result_formats: vec![],
                            };
                            if let Err(Outcome::Error(code, text)) = run_portal(&portal, &mut out) {
                                out.extend(error_response(code, &text));
                                break;
                            }
                        }
                        Err((code, text)) => {
                            out.extend(error_response(code, &text));
                            break;
                        }
                    }
                }
                out.extend(ready(txn));
            }
            _ => {}
        }

        stats.lock().live = statements.len();
        // the client may already be gone; keep reading what it sent
        if let Some(at) = split_at.filter(|&at| at < out.len()) {
            let _ = io.write_all(&out[..at]).await;
            tokio::time::sleep(TORN_ROW_PAUSE).await;
            let _ = io.write_all(&out[at..]).await;
        } else if !out.is_empty() {
            let _ = io.write_all(&out).await;
        }
        if deaf && tag == b'S' {
            std::future::pending::<()>().await;
        }
    }
}

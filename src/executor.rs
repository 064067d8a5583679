//! # Executor / HTTP Front-End
//!
//! The accept loop feeds client connections into a wait queue. A single
//! waiter thread walks the queue: closed or expired connections are
//! dropped, readable ones move to the run queue, the rest are requeued,
//! and once the whole queue was walked without progress the waiter sleeps
//! briefly. A fixed pool of workers pulls readable connections from the
//! run queue; each worker owns a processor (a coordinator connection plus
//! the compiled program) and handles one request at a time.
//!
//! A panic inside request handling is confined to the worker: the client
//! gets a 500, the processor is dropped (its coordinator connection going
//! away reverts any open transaction) and a fresh one is attached.

use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{error, info, warn};

use crate::algebra::VarScope;
use crate::config::ServerConfig;
use crate::coordinator::CoordClient;
use crate::csv;
use crate::env::{Environment, Func};
use crate::expr::Params;
use crate::http::{self, Method, Request};
use crate::limits::MAX_BLOCK;
use crate::tuple::TupleBuf;
use crate::value::Value;
use crate::volume;
use crate::wire::{sid_to_str, VarSet};

use crate::error::HttpError;

/// One client connection moving between the queues
struct Conn {
    id: u64,
    stream: TcpStream,
    touched: Instant,
}

enum Readiness {
    Ready,
    Idle,
    Closed,
}

fn readiness(stream: &TcpStream) -> Readiness {
    if stream.set_nonblocking(true).is_err() {
        return Readiness::Closed;
    }
    let mut probe = [0u8; 1];
    let res = match stream.peek(&mut probe) {
        Ok(0) => Readiness::Closed,
        Ok(_) => Readiness::Ready,
        Err(e) if e.kind() == ErrorKind::WouldBlock => Readiness::Idle,
        Err(_) => Readiness::Closed,
    };
    if stream.set_nonblocking(false).is_err() {
        return Readiness::Closed;
    }
    res
}

/// Accept loop plus queue plumbing; runs in the foreground
pub fn multiplex(port: u16, tx_addr: &str, cfg: &ServerConfig) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .with_context(|| format!("cannot bind executor port {port}"))?;
    serve_listener(listener, tx_addr, cfg)
}

/// Run the front-end on an already-bound listener
pub fn serve_listener(
    listener: TcpListener,
    tx_addr: &str,
    cfg: &ServerConfig,
) -> anyhow::Result<()> {
    let (waitq_tx, waitq_rx) = unbounded::<Conn>();
    let (runq_tx, runq_rx) = unbounded::<Conn>();

    {
        let waitq_tx = waitq_tx.clone();
        let keep_alive = Duration::from_millis(cfg.keep_alive_ms);
        let poll_sleep = Duration::from_millis(cfg.poll_sleep_ms);
        thread::spawn(move || waiter(&waitq_rx, &waitq_tx, &runq_tx, keep_alive, poll_sleep));
    }

    for i in 0..cfg.threads {
        let runq_rx = runq_rx.clone();
        let waitq_tx = waitq_tx.clone();
        let tx_addr = tx_addr.to_string();
        let proc_wait = Duration::from_secs(cfg.proc_wait_secs);
        thread::spawn(move || worker(i, &tx_addr, proc_wait, &runq_rx, &waitq_tx));
    }

    info!(addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
          tx = tx_addr, "executor started");

    let mut next_id = 0u64;
    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                next_id += 1;
                let _ = waitq_tx.send(Conn {
                    id: next_id,
                    stream,
                    touched: Instant::now(),
                });
            }
            Err(e) => warn!(error = %e, "accept failed"),
        }
    }
    Ok(())
}

/// Drain the wait queue: run readable connections, drop dead or expired
/// ones, requeue the rest. `start` marks the first requeued connection so
/// a full fruitless cycle is detectable.
fn waiter(
    waitq_rx: &Receiver<Conn>,
    waitq_tx: &Sender<Conn>,
    runq_tx: &Sender<Conn>,
    keep_alive: Duration,
    poll_sleep: Duration,
) {
    let mut start: Option<u64> = None;
    while let Ok(conn) = waitq_rx.recv() {
        match readiness(&conn.stream) {
            Readiness::Closed => {
                start = None;
            }
            Readiness::Ready => {
                start = None;
                let _ = runq_tx.send(conn);
            }
            Readiness::Idle => {
                if conn.touched.elapsed() >= keep_alive {
                    start = None;
                    continue;
                }
                if start == Some(conn.id) {
                    // walked the whole queue without progress
                    thread::sleep(poll_sleep);
                }
                if start.is_none() {
                    start = Some(conn.id);
                }
                let _ = waitq_tx.send(conn);
            }
        }
    }
}

fn worker(
    id: usize,
    tx_addr: &str,
    proc_wait: Duration,
    runq_rx: &Receiver<Conn>,
    waitq_tx: &Sender<Conn>,
) {
    loop {
        let mut proc = match Processor::attach(tx_addr, proc_wait) {
            Ok(proc) => proc,
            Err(e) => {
                error!(worker = id, error = %format!("{e:#}"), "failed to start a processor");
                thread::sleep(proc_wait);
                continue;
            }
        };

        while !proc.poisoned {
            let Ok(mut conn) = runq_rx.recv() else {
                return;
            };

            let outcome = catch_unwind(AssertUnwindSafe(|| proc.handle(&conn.stream)));
            if outcome.is_err() {
                // evaluation blew up; the dropped coordinator connection
                // reverts whatever was in flight
                proc.poisoned = true;
                let status = http::respond_500(&mut &conn.stream);
                error!(worker = id, status, "request handler panicked");
            }

            conn.touched = Instant::now();
            let _ = waitq_tx.send(conn);
        }

        warn!(worker = id, "respawning processor");
    }
}

/// A worker's dispatch state: one coordinator connection and the compiled
/// program
struct Processor {
    client: CoordClient,
    env: Environment,
    eid: String,
    poisoned: bool,
}

impl Processor {
    fn attach(tx_addr: &str, proc_wait: Duration) -> anyhow::Result<Processor> {
        let mut client = CoordClient::attach_timeout(tx_addr, proc_wait)
            .with_context(|| format!("cannot attach to the coordinator at {tx_addr}"))?;
        let code = client.program().with_context(|| "cannot fetch the program")?;
        let env = Environment::parse(&code).with_context(|| "cannot compile the program")?;
        let eid = client.local_addr();
        Ok(Processor { client, env, eid, poisoned: false })
    }

    /// Handle one request on the connection. Returns the response status,
    /// negated when the client socket died mid-response, or 0 when the
    /// connection closed before a request arrived.
    fn handle(&mut self, stream: &TcpStream) -> i32 {
        let started = Instant::now();
        let mut out = stream;

        let mut rdr = stream;
        let req = match http::parse_request(&mut rdr) {
            Ok(req) => req,
            Err(HttpError::Closed) => return 0,
            Err(HttpError::Malformed(_)) => {
                let status = http::respond_400(&mut out);
                log_request(0, "?", "malformed", started, status);
                return status;
            }
        };

        let (sid, status) = self.dispatch(&req, out);
        log_request(sid, req.method.as_str(), &req.path, started, status);
        status
    }

    fn dispatch(&mut self, req: &Request, mut out: &TcpStream) -> (i64, i32) {
        if req.method == Method::Options {
            return (0, http::respond_options(&mut out));
        }

        if let Some(prefix) = req.path.strip_prefix("/fn") {
            let prefix = prefix.strip_prefix('/').unwrap_or(prefix);
            return (0, self.list_functions(prefix, out));
        }

        // ---- resolve the function and its arguments (client errors) ----

        let name = req.path.strip_prefix('/').unwrap_or(&req.path);
        let Some(func) = self.env.func(name).cloned() else {
            return (0, http::respond_404(&mut out, &format!("unknown function '{name}'")));
        };

        if func.rel_param.is_some() && req.method != Method::Post {
            return (0, http::respond_405(&mut out, Method::Post));
        }
        if func.rel_param.is_none() && req.method == Method::Post {
            return (0, http::respond_405(&mut out, Method::Get));
        }

        for (qname, _) in &req.query {
            if req.query.iter().filter(|(n, _)| n == qname).count() > 1 {
                let msg = format!("duplicate parameter '{qname}' (not supported)");
                return (0, http::respond_404(&mut out, &msg));
            }
        }
        if func.prim_params.len() != req.query.len() {
            let msg = format!(
                "expected {} primitive parameters, got {}",
                func.prim_params.len(),
                req.query.len()
            );
            return (0, http::respond_404(&mut out, &msg));
        }

        let mut args: Vec<Value> = Vec::with_capacity(func.prim_params.len());
        for (pname, ty) in &func.prim_params {
            let Some((_, raw)) = req.query.iter().find(|(n, _)| n == pname) else {
                return (0, http::respond_404(&mut out, &format!("unknown parameter '{pname}'")));
            };
            match ty.parse(raw) {
                Ok(v) => args.push(v),
                Err(_) => {
                    let msg =
                        format!("value '{raw}' (parameter '{pname}') is not of type '{ty}'");
                    return (0, http::respond_404(&mut out, &msg));
                }
            }
        }
        let params = Params::new(args);

        let mut vars = VarScope::new();
        if let Some(rp) = &func.rel_param {
            let body = if req.body.is_empty() {
                TupleBuf::new()
            } else {
                let text = match String::from_utf8(req.body.clone()) {
                    Ok(text) => text,
                    Err(_) => {
                        return (0, http::respond_404(&mut out, "bad csv: not valid utf-8"))
                    }
                };
                match csv::decode_relation(&text, &rp.head) {
                    Ok(body) => body,
                    Err(e) => return (0, http::respond_404(&mut out, &e.to_string())),
                }
            };

            // run the body through a projection onto the parameter head,
            // which also removes duplicate rows
            vars.insert(rp.name.clone(), body);
            let names: Vec<String> =
                rp.head.attrs().iter().map(|(n, _)| n.clone()).collect();
            let param = crate::algebra::Rel::project(
                crate::algebra::Rel::load(rp.head.clone(), rp.name.clone()),
                &names,
            )
            .expect("projection onto the parameter's own head");
            let projected = param.eval(&mut vars, &params);
            vars.insert(rp.name.clone(), projected);
        }

        // ---- the transaction (server errors from here on) --------------

        let mut rset = VarSet::new();
        for name in &func.read {
            rset.put(name, 0);
        }
        let mut wset = VarSet::new();
        for name in &func.write {
            wset.put(name, 0);
        }

        let sid = match self.client.enter(&self.eid, &mut rset, &mut wset) {
            Ok(sid) => sid,
            Err(e) => {
                warn!(error = %e, "enter failed");
                self.poisoned = true;
                return (0, http::respond_500(&mut out));
            }
        };

        let status = match self.run_transaction(&func, &mut vars, &params, &rset, &wset, sid, out)
        {
            Ok(status) => status,
            Err(status) => {
                // the volume failed mid-transaction
                if self.client.revert(sid).is_err() {
                    self.poisoned = true;
                }
                status
            }
        };
        (sid, status)
    }

    fn list_functions(&self, prefix: &str, mut out: &TcpStream) -> i32 {
        let mut status = http::respond_200_chunked(&mut out);
        if status != 200 {
            return status;
        }

        status = http::write_chunk(
            &mut out,
            b"fname string,pname string,pattr string,ptype string\n",
        );
        for func in self.env.funcs_with_prefix(prefix) {
            if status != 200 {
                break;
            }
            let mut rows = format!("{},,,\n", func.name);
            if let Some(ret) = &func.ret {
                for (aname, ty) in ret.attrs() {
                    rows.push_str(&format!("{},{},return,{}\n", func.name, aname, ty));
                }
            }
            for (pname, ty) in &func.prim_params {
                rows.push_str(&format!("{},,{},{}\n", func.name, pname, ty));
            }
            if let Some(rp) = &func.rel_param {
                for (aname, ty) in rp.head.attrs() {
                    rows.push_str(&format!("{},{},{},{}\n", func.name, aname, rp.name, ty));
                }
            }
            status = http::write_chunk(&mut out, rows.as_bytes());
        }

        if status == 200 {
            status = http::write_chunk(&mut out, b"");
        }
        status
    }
}

impl Processor {
    /// Read the read set, evaluate the statements, write the write set,
    /// then answer and commit. The `Err` status means the transaction
    /// must revert.
    fn run_transaction(
        &mut self,
        func: &Func,
        vars: &mut VarScope,
        params: &Params,
        rset: &VarSet,
        wset: &VarSet,
        sid: i64,
        mut out: &TcpStream,
    ) -> Result<i32, i32> {
        for item in &rset.items {
            let head = self.env.head(&item.name).expect("read set variable");
            match volume::read(&item.volume, &item.name, item.version, &head.types()) {
                Ok(body) => vars.insert(item.name.clone(), body),
                Err(e) => {
                    warn!(var = %item.name, error = %e, "volume read failed");
                    return Err(http::respond_500(&mut out));
                }
            }
        }
        for item in &wset.items {
            if !vars.contains(&item.name) {
                vars.insert(item.name.clone(), TupleBuf::new());
            }
        }
        for name in &func.temp {
            if !vars.contains(name) {
                vars.insert(name.clone(), TupleBuf::new());
            }
        }

        let mut last = TupleBuf::new();
        for stmt in &func.stmts {
            last = stmt.eval(vars, params);
        }

        for item in &wset.items {
            let body = vars.take(&item.name).expect("write set variable");
            if let Err(e) = volume::write(&item.volume, &body, &item.name, item.version) {
                warn!(var = %item.name, error = %e, "volume write failed");
                return Err(http::respond_500(&mut out));
            }
        }

        let mut status = http::respond_200_chunked(&mut out);
        if status != 200 {
            return Err(status);
        }

        // the transaction is durable before the first body byte; a commit
        // failure truncates the chunked response instead of unwinding it
        if let Err(e) = self.client.commit(sid) {
            warn!(error = %e, "commit failed");
            self.poisoned = true;
            return Ok(-200);
        }

        if let Some(ret) = &func.ret {
            let mut buf = csv::header_line(ret);
            for t in last.iter() {
                let row = csv::row_line(t);
                if buf.len() + row.len() > MAX_BLOCK && status == 200 {
                    status = http::write_chunk(&mut out, buf.as_bytes());
                    buf.clear();
                }
                buf.push_str(&row);
            }
            if status == 200 && !buf.is_empty() {
                status = http::write_chunk(&mut out, buf.as_bytes());
            }
        }
        if status == 200 {
            status = http::write_chunk(&mut out, b"");
        }
        Ok(status)
    }
}

fn log_request(sid: i64, method: &str, path: &str, started: Instant, status: i32) {
    if status == 0 {
        return;
    }
    info!(
        sid = %sid_to_str(sid),
        method,
        path,
        elapsed_ms = started.elapsed().as_millis() as u64,
        status,
        "request"
    );
}

//! # Transaction Coordinator
//!
//! Multi-version, multi-reader / single-writer scheduling over the global
//! variables. Every `enter` assigns a fresh sid, inserts one entry per
//! touched variable, and blocks on the entries that conflict with an
//! earlier runnable writer; every `finish` flips the transaction's entries
//! to their final state, persists the authoritative versions, and wakes the
//! smallest waiting writer plus the reads ordered before it.
//!
//! All coordinator state lives behind one mutex; per-entry monitors exist
//! only to block and wake individual transactions. A client connection
//! that drops while its transaction is open is reverted by the connection
//! handler, which is the sole rollback mechanism for executor failure.

use std::fs;
use std::io::Write as _;
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::env::Environment;
use crate::error::{WireError, WireResult};
use crate::monitor::Monitor;
use crate::wire::{
    self, read_addr, read_i32, read_i64, sid_from_str, sid_to_str, write_i32, write_i64, VarSet,
    R_ENTER, R_FINISH, R_SOURCE, R_SYNC, T_ENTER, T_FINISH, T_SOURCE, T_SYNC,
};

/// Wire value of a committed finish
pub const COMMITTED: i32 = 3;
/// Wire value of a reverted finish
pub const REVERTED: i32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Runnable,
    Waiting,
    Committed,
    Reverted,
}

/// The mutable part of an entry, guarded by its own monitor so the owning
/// transaction can block on it
#[derive(Debug)]
struct Slot {
    state: EntryState,
    version: i64,
}

/// Per-variable record of one transaction's intent
#[derive(Debug)]
struct Entry {
    sid: i64,
    name: String,
    action: Action,
    /// Volume chosen for a write action
    wvid: String,
    cell: Arc<Monitor<Slot>>,
}

impl Entry {
    fn new(sid: i64, name: &str, action: Action, version: i64, state: EntryState) -> Entry {
        Entry {
            sid,
            name: name.to_string(),
            action,
            wvid: String::new(),
            cell: Arc::new(Monitor::new(Slot { state, version })),
        }
    }

    fn snapshot(&self) -> (EntryState, i64) {
        let slot = self.cell.lock();
        (slot.state, slot.version)
    }
}

/// One registered volume's locally-held version set
#[derive(Debug)]
struct VolumeInfo {
    id: String,
    vars: VarSet,
}

#[derive(Debug, Default)]
struct State {
    /// Most recent first
    entries: Vec<Entry>,
    /// Most recently synced first
    volumes: Vec<VolumeInfo>,
    last_sid: i64,
    gvars: Vec<String>,
}

/// `host` prefixes (up to the first `:`) compare equal
fn host_match(a: &str, b: &str) -> bool {
    fn host(s: &str) -> &str {
        s.split(':').next().unwrap_or("")
    }
    host(a) == host(b)
}

impl State {
    /// Version a transaction `sid` reads for `name`: the newest committed
    /// write strictly before it
    fn get_rsid(&self, sid: i64, name: &str) -> i64 {
        let mut res = -1;
        for e in &self.entries {
            if e.action == Action::Write && e.name == name && e.sid < sid && e.sid > res {
                if e.snapshot().0 == EntryState::Committed {
                    res = e.sid;
                }
            }
        }
        res
    }

    /// The runnable writer on `name`, if any
    fn runnable_writer(&self, name: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|e| {
                e.action == Action::Write
                    && e.name == name
                    && e.snapshot().0 == EntryState::Runnable
            })
            .map(|e| e.sid)
    }

    /// True while some runnable read still references version `sid` of
    /// `name`
    fn is_active(&self, name: &str, sid: i64) -> bool {
        self.entries.iter().any(|e| {
            e.action == Action::Read && e.name == name && {
                let (state, version) = e.snapshot();
                state == EntryState::Runnable && version == sid
            }
        })
    }

    fn min_waiting_writer(&self, name: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .filter(|e| {
                e.action == Action::Write
                    && e.name == name
                    && e.snapshot().0 == EntryState::Waiting
            })
            .min_by_key(|e| e.sid)
    }

    fn waiting_reads(&self, name: &str, max_sid: i64) -> Vec<&Entry> {
        self.entries
            .iter()
            .filter(|e| {
                e.action == Action::Read
                    && e.name == name
                    && e.sid <= max_sid
                    && e.snapshot().0 == EntryState::Waiting
            })
            .collect()
    }

    /// An entry is removable once it can no longer influence version
    /// resolution: a committed write that is neither the latest committed
    /// write nor actively read, a committed read, or anything reverted.
    fn gc_entries(&mut self) {
        let mut keep = Vec::with_capacity(self.entries.len());
        for i in 0..self.entries.len() {
            let e = &self.entries[i];
            let (state, _) = e.snapshot();
            let rm = match (e.action, state) {
                (Action::Write, EntryState::Committed) => {
                    let latest = self.get_rsid(i64::MAX, &e.name);
                    e.sid < latest && !self.is_active(&e.name, e.sid)
                }
                (Action::Read, EntryState::Committed) => true,
                (_, EntryState::Reverted) => true,
                _ => false,
            };
            keep.push(!rm);
        }
        let mut it = keep.into_iter();
        self.entries.retain(|_| it.next().expect("keep flag"));
    }

    fn volume_mut(&mut self, vid: &str) -> Option<&mut VolumeInfo> {
        self.volumes.iter_mut().find(|v| v.id == vid)
    }

    /// The volume to serve `(name, ver)` from, preferring one on the same
    /// host as `addr`. With no constraint every volume qualifies. The scan
    /// stops at the first same-host volume once any candidate exists;
    /// otherwise the last qualifying volume in registry order wins.
    fn closest_vol(&self, addr: &str, name: &str, ver: i64) -> String {
        let mut res = String::new();
        for vol in &self.volumes {
            if name.is_empty() || ver < 1 || vol.vars.scan(name, ver).is_some() {
                res.clone_from(&vol.id);
            }
            if !res.is_empty() && host_match(addr, &vol.id) {
                break;
            }
        }
        res
    }

    /// Highest committed write version per global variable
    fn current_versions(&self) -> Vec<(String, i64)> {
        let mut vers: Vec<(String, i64)> = self.gvars.iter().map(|n| (n.clone(), 0)).collect();
        for e in &self.entries {
            if e.action != Action::Write {
                continue;
            }
            let (state, version) = e.snapshot();
            if state != EntryState::Committed {
                continue;
            }
            if let Some(slot) = vers.iter_mut().find(|(n, _)| n == &e.name) {
                if slot.1 < version {
                    slot.1 = version;
                }
            }
        }
        vers
    }
}

/// The process-wide coordinator instance
pub struct Coordinator {
    state: Mutex<State>,
    source: String,
    state_file: PathBuf,
    state_backup: PathBuf,
}

impl Coordinator {
    /// Load the state file (rotating an interrupted `.backup` back first),
    /// reconcile it against the program, and persist the result. Variables
    /// the program no longer declares are dropped from the in-memory set;
    /// new variables start with a synthetic committed version 1.
    pub fn new(source: String, state_file: &Path) -> anyhow::Result<Coordinator> {
        let env = Environment::parse(&source)
            .with_context(|| "cannot compile the program source")?;

        let state_backup = backup_path(state_file);
        if state_backup.exists() {
            fs::rename(&state_backup, state_file)
                .with_context(|| "cannot restore the state file backup")?;
        }
        if !state_file.exists() {
            fs::write(state_file, b"").with_context(|| "cannot create the state file")?;
        }

        let mut state = State {
            entries: Vec::new(),
            volumes: Vec::new(),
            last_sid: 1,
            gvars: Vec::new(),
        };

        let text = fs::read_to_string(state_file)
            .with_context(|| "cannot read the state file")?;
        for (i, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let (name, sid_text) = line
                .split_once(',')
                .with_context(|| format!("bad line {}:{}", state_file.display(), i + 1))?;
            let sid = sid_from_str(sid_text)
                .with_context(|| format!("bad sid on line {}:{}", state_file.display(), i + 1))?;

            if env.head(name).is_none() {
                // dropped from the program; volumes forget the files at
                // their next sync
                continue;
            }

            if sid > state.last_sid {
                state.last_sid = sid;
            }
            state.gvars.push(name.to_string());
            state.entries.insert(
                0,
                Entry::new(sid, name, Action::Write, sid, EntryState::Committed),
            );
        }

        for (name, _) in env.vars() {
            if !state.gvars.contains(name) {
                state.gvars.push(name.clone());
                state.entries.insert(
                    0,
                    Entry::new(1, name, Action::Write, 1, EntryState::Committed),
                );
            }
        }

        let source_file = source_path(state_file);
        fs::write(&source_file, source.as_bytes())
            .with_context(|| format!("cannot write {}", source_file.display()))?;

        let coord = Coordinator {
            state: Mutex::new(state),
            source,
            state_file: state_file.to_path_buf(),
            state_backup,
        };
        {
            let state = coord.state.lock();
            coord.write_state(&state)?;
        }
        Ok(coord)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Persist `name,sid` per variable, atomically via backup rotate +
    /// rename
    fn write_state(&self, state: &State) -> anyhow::Result<()> {
        let mut buf = String::new();
        for (name, ver) in state.current_versions() {
            buf.push_str(&format!("{},{}\n", name, sid_to_str(ver)));
        }

        if self.state_file.exists() {
            fs::rename(&self.state_file, &self.state_backup)
                .with_context(|| "cannot rotate the state file")?;
        }
        let mut f = fs::File::create(&self.state_file)
            .with_context(|| "cannot create the state file")?;
        f.write_all(buf.as_bytes())
            .with_context(|| "cannot write the state file")?;
        let _ = fs::remove_file(&self.state_backup);
        Ok(())
    }

    /// Open a transaction: assign a sid, queue one entry per variable,
    /// block while any entry conflicts with an earlier runnable writer,
    /// then resolve the volume to use for every variable. The read and
    /// write sets come back with versions and volume ids filled in.
    pub fn enter(&self, eid: &str, rset: &mut VarSet, wset: &mut VarSet) -> i64 {
        let sid;
        let mut wcells = Vec::with_capacity(wset.len());
        let mut rcells = Vec::with_capacity(rset.len());
        {
            let mut st = self.state.lock();
            let wvid = st.closest_vol(eid, "", 0);

            st.last_sid += 1;
            sid = st.last_sid;

            for w in &mut wset.items {
                let state = if st.runnable_writer(&w.name).is_some() {
                    EntryState::Waiting
                } else {
                    EntryState::Runnable
                };
                let mut e = Entry::new(sid, &w.name, Action::Write, sid, state);
                e.wvid.clone_from(&wvid);
                wcells.push(Arc::clone(&e.cell));
                st.entries.insert(0, e);
                w.volume.clone_from(&wvid);
            }

            let rw = !wset.is_empty();
            for r in &mut rset.items {
                let mut rsid = st.get_rsid(sid, &r.name);
                let mut state = EntryState::Runnable;
                if rw {
                    if let Some(wsid) = st.runnable_writer(&r.name) {
                        if sid > wsid {
                            rsid = -1;
                            state = EntryState::Waiting;
                        }
                    }
                }
                let e = Entry::new(sid, &r.name, Action::Read, rsid, state);
                rcells.push(Arc::clone(&e.cell));
                st.entries.insert(0, e);
            }
        }

        for (cell, spec) in rcells.iter().zip(&mut rset.items) {
            let mut slot = cell.lock();
            while slot.state == EntryState::Waiting {
                cell.wait(&mut slot, -1);
            }
            spec.version = slot.version;
        }
        for (cell, spec) in wcells.iter().zip(&mut wset.items) {
            let mut slot = cell.lock();
            while slot.state == EntryState::Waiting {
                cell.wait(&mut slot, -1);
            }
            spec.version = slot.version;
        }

        {
            let st = self.state.lock();
            for r in &mut rset.items {
                r.volume = st.closest_vol(eid, &r.name, r.version);
            }
        }

        sid
    }

    pub fn commit(&self, sid: i64) {
        self.finish(sid, EntryState::Committed);
    }

    pub fn revert(&self, sid: i64) {
        self.finish(sid, EntryState::Reverted);
    }

    fn finish(&self, sid: i64, final_state: EntryState) {
        let mut wake: Vec<Arc<Monitor<Slot>>> = Vec::new();
        {
            let mut st = self.state.lock();

            let mine: Vec<usize> = st
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| e.sid == sid)
                .map(|(i, _)| i)
                .collect();

            for i in mine {
                let (prev, version) = st.entries[i].snapshot();
                st.entries[i].cell.lock().state = final_state;

                let (action, name, wvid) = {
                    let e = &st.entries[i];
                    (e.action, e.name.clone(), e.wvid.clone())
                };

                if action == Action::Write && prev == EntryState::Runnable {
                    let rsid = if final_state == EntryState::Reverted {
                        st.get_rsid(sid, &name)
                    } else {
                        if let Some(vol) = st.volume_mut(&wvid) {
                            vol.vars.put(&name, version);
                        }
                        version
                    };

                    let mut wsid = i64::MAX;
                    if let Some(we) = st.min_waiting_writer(&name) {
                        wsid = we.sid;
                        wake.push(Arc::clone(&we.cell));
                    }

                    for re in st.waiting_reads(&name, wsid) {
                        re.cell.lock().version = rsid;
                        wake.push(Arc::clone(&re.cell));
                    }
                }
            }

            if let Err(e) = self.write_state(&st) {
                // an unwritable state file leaves no safe way to continue
                tracing::error!(error = %format!("{e:#}"), "cannot persist the coordinator state");
                std::process::exit(1);
            }
            st.gc_entries();
        }

        for cell in wake {
            let mut slot = cell.lock();
            slot.state = EntryState::Runnable;
            cell.notify();
        }
    }

    /// Replace the coordinator's view of one volume and return the
    /// authoritative set of committed writes with owning volumes resolved
    pub fn volume_sync(&self, vid: &str, held: VarSet) -> VarSet {
        let mut st = self.state.lock();

        st.volumes.retain(|v| v.id != vid);
        st.volumes.insert(0, VolumeInfo { id: vid.to_string(), vars: held });

        let mut out = VarSet::new();
        for e in &st.entries {
            if e.action == Action::Write {
                let (state, version) = e.snapshot();
                if state == EntryState::Committed {
                    out.put(&e.name, version);
                }
            }
        }
        for item in &mut out.items {
            item.volume = st.closest_vol(vid, &item.name, item.version);
        }

        debug!(volume = vid, "volume sync");
        out
    }

    pub fn drop_volume(&self, vid: &str) {
        let mut st = self.state.lock();
        st.volumes.retain(|v| v.id != vid);
    }

    /// Formatted dump of live entries and the volume registry
    pub fn dump_state(&self) -> String {
        let st = self.state.lock();
        let mut out = String::new();
        out.push_str(&format!(
            "{:<18} {:<32} {:<5} {:<18} {:<9}\n",
            "SID", "VARIABLE", "ATYPE", "ASID", "STATE"
        ));
        for e in &st.entries {
            let (state, version) = e.snapshot();
            let action = match e.action {
                Action::Read => "READ",
                Action::Write => "WRITE",
            };
            let state = match state {
                EntryState::Runnable => "RUNNABLE",
                EntryState::Waiting => "WAITING",
                EntryState::Committed => "COMMITTED",
                EntryState::Reverted => "REVERTED",
            };
            out.push_str(&format!(
                "{:<18} {:<32} {:<5} {:<18} {:<9}\n",
                sid_to_str(e.sid),
                e.name,
                action,
                sid_to_str(version),
                state
            ));
        }
        out.push_str(&format!("{:<24} {:<32} {:<18}\n", "VOLUME", "VARIABLE", "SID"));
        for vol in &st.volumes {
            for v in &vol.vars.items {
                out.push_str(&format!(
                    "{:<24} {:<32} {:<18}\n",
                    vol.id,
                    v.name,
                    sid_to_str(v.version)
                ));
            }
        }
        out
    }
}

fn backup_path(state_file: &Path) -> PathBuf {
    PathBuf::from(format!("{}.backup", state_file.display()))
}

/// The `.source` companion holding the exact program text
pub fn source_path(state_file: &Path) -> PathBuf {
    PathBuf::from(format!("{}.source", state_file.display()))
}

// ---- wire server ------------------------------------------------------

/// Serve coordinator RPC on `listener`, one thread per connection
pub fn serve(coord: Arc<Coordinator>, listener: TcpListener) {
    for conn in listener.incoming() {
        match conn {
            Ok(stream) => {
                let coord = Arc::clone(&coord);
                thread::spawn(move || handle_conn(&coord, &stream));
            }
            Err(e) => warn!(error = %e, "coordinator accept failed"),
        }
    }
}

fn handle_conn(coord: &Coordinator, stream: &TcpStream) {
    let mut sid = 0i64;
    let mut vid = String::new();

    let res = serve_requests(coord, stream, &mut sid, &mut vid);
    if let Err(e) = res {
        debug!(error = %e, "coordinator connection ended");
    }

    if sid != 0 {
        warn!(sid = %sid_to_str(sid), "transaction failed, reverting");
        coord.revert(sid);
    }
    if !vid.is_empty() {
        coord.drop_volume(&vid);
        info!(volume = vid, "volume disconnected");
    }
}

fn serve_requests(
    coord: &Coordinator,
    stream: &TcpStream,
    sid: &mut i64,
    vid: &mut String,
) -> WireResult<()> {
    let mut io = stream;
    loop {
        let tag = match read_i32(&mut io) {
            Ok(tag) => tag,
            // clean shutdown between requests
            Err(WireError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(())
            }
            Err(e) => return Err(e),
        };

        match tag {
            T_ENTER => {
                if *sid != 0 {
                    return Err(WireError::Protocol("nested enter".to_string()));
                }
                let eid = read_addr(&mut io)?;
                let mut rset = VarSet::read(&mut io)?;
                let mut wset = VarSet::read(&mut io)?;

                *sid = coord.enter(&eid, &mut rset, &mut wset);

                write_i32(&mut io, R_ENTER)?;
                write_i64(&mut io, *sid)?;
                rset.write(&mut io)?;
                wset.write(&mut io)?;
            }

            T_FINISH => {
                let msid = read_i64(&mut io)?;
                let mstate = read_i32(&mut io)?;
                if msid != *sid || (mstate != COMMITTED && mstate != REVERTED) {
                    return Err(WireError::Protocol("bad finish".to_string()));
                }

                if mstate == COMMITTED {
                    coord.commit(*sid);
                } else {
                    coord.revert(*sid);
                }
                let finished = *sid;
                *sid = 0; // past this point there is nothing to revert

                write_i32(&mut io, R_FINISH)?;
                write_i32(&mut io, mstate)?;
                info!(sid = %sid_to_str(finished), "transaction finished");
            }

            T_SYNC => {
                *vid = read_addr(&mut io)?;
                let held = VarSet::read(&mut io)?;
                let out = coord.volume_sync(vid, held);
                write_i32(&mut io, R_SYNC)?;
                out.write(&mut io)?;
                tracing::trace!(state = %coord.dump_state(), "after volume sync");
            }

            T_SOURCE => {
                write_i32(&mut io, R_SOURCE)?;
                let bytes = coord.source().as_bytes();
                write_i32(&mut io, bytes.len() as i32)?;
                io.write_all(bytes)?;
            }

            other => {
                return Err(WireError::Protocol(format!("unknown tag {other}")));
            }
        }
    }
}

// ---- wire client ------------------------------------------------------

/// One process's connection to the coordinator. Requests are strictly
/// sequential over the connection; dropping it implicitly reverts the
/// in-flight transaction.
pub struct CoordClient {
    stream: TcpStream,
}

impl CoordClient {
    pub fn attach(addr: &str) -> WireResult<CoordClient> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(CoordClient { stream })
    }

    /// Attach with a connect deadline; used by the executor's processor
    /// startup budget
    pub fn attach_timeout(addr: &str, timeout: std::time::Duration) -> WireResult<CoordClient> {
        use std::net::ToSocketAddrs;
        let sockaddr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| WireError::Protocol(format!("cannot resolve '{addr}'")))?;
        let stream = TcpStream::connect_timeout(&sockaddr, timeout)?;
        stream.set_nodelay(true)?;
        Ok(CoordClient { stream })
    }

    /// Local address of this client's socket, used as the executor id for
    /// volume proximity
    pub fn local_addr(&self) -> String {
        self.stream
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_default()
    }

    pub fn program(&mut self) -> WireResult<String> {
        let mut io = &self.stream;
        write_i32(&mut io, T_SOURCE)?;
        wire::expect_tag(&mut io, R_SOURCE)?;
        let len = read_i32(&mut io)?;
        if len < 0 {
            return Err(WireError::Protocol("negative source length".to_string()));
        }
        let mut buf = vec![0u8; len as usize];
        use std::io::Read as _;
        io.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| WireError::Protocol("non-utf8 source".to_string()))
    }

    pub fn enter(&mut self, eid: &str, rset: &mut VarSet, wset: &mut VarSet) -> WireResult<i64> {
        let mut io = &self.stream;
        write_i32(&mut io, T_ENTER)?;
        wire::write_addr(&mut io, eid)?;
        rset.write(&mut io)?;
        wset.write(&mut io)?;

        wire::expect_tag(&mut io, R_ENTER)?;
        let sid = read_i64(&mut io)?;
        *rset = VarSet::read(&mut io)?;
        *wset = VarSet::read(&mut io)?;
        Ok(sid)
    }

    fn finish(&mut self, sid: i64, state: i32) -> WireResult<()> {
        let mut io = &self.stream;
        write_i32(&mut io, T_FINISH)?;
        write_i64(&mut io, sid)?;
        write_i32(&mut io, state)?;

        wire::expect_tag(&mut io, R_FINISH)?;
        let got = read_i32(&mut io)?;
        if got != state {
            return Err(WireError::Protocol("finish state mismatch".to_string()));
        }
        Ok(())
    }

    pub fn commit(&mut self, sid: i64) -> WireResult<()> {
        self.finish(sid, COMMITTED)
    }

    pub fn revert(&mut self, sid: i64) -> WireResult<()> {
        self.finish(sid, REVERTED)
    }

    pub fn volume_sync(&mut self, vid: &str, held: &VarSet) -> WireResult<VarSet> {
        let mut io = &self.stream;
        write_i32(&mut io, T_SYNC)?;
        wire::write_addr(&mut io, vid)?;
        held.write(&mut io)?;

        wire::expect_tag(&mut io, R_SYNC)?;
        VarSet::read(&mut io)
    }
}

/// Bind and serve a coordinator in background threads; returns the bound
/// address
pub fn spawn_server(coord: Arc<Coordinator>, port: u16) -> anyhow::Result<String> {
    let listener = TcpListener::bind(("127.0.0.1", port))
        .with_context(|| format!("cannot bind coordinator port {port}"))?;
    let addr = listener.local_addr()?.to_string();
    info!(addr = %addr, "coordinator started");
    thread::spawn(move || serve(coord, listener));
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SRC: &str = "type T { a int }\nvar v T;\nvar w T;\n";

    fn coord(dir: &TempDir) -> Coordinator {
        Coordinator::new(SRC.to_string(), &dir.path().join("state")).unwrap()
    }

    fn rw(read: &[&str], write: &[&str]) -> (VarSet, VarSet) {
        let mut r = VarSet::new();
        for name in read {
            r.put(*name, 0);
        }
        let mut w = VarSet::new();
        for name in write {
            w.put(*name, 0);
        }
        (r, w)
    }

    #[test]
    fn test_init_creates_state_file() {
        let dir = TempDir::new().unwrap();
        let c = coord(&dir);
        let text = fs::read_to_string(dir.path().join("state")).unwrap();
        assert!(text.contains("v,0000000000000001"));
        assert!(text.contains("w,0000000000000001"));
        drop(c);

        // .source companion holds the program
        let src = fs::read_to_string(dir.path().join("state.source")).unwrap();
        assert_eq!(src, SRC);
    }

    #[test]
    fn test_reader_sees_latest_committed() {
        let dir = TempDir::new().unwrap();
        let c = coord(&dir);

        let (mut r, mut w) = rw(&[], &["v"]);
        let sid = c.enter("", &mut r, &mut w);
        assert_eq!(w.items[0].version, sid);
        c.commit(sid);

        let (mut r, mut w) = rw(&["v"], &[]);
        c.enter("", &mut r, &mut w);
        assert_eq!(r.items[0].version, sid);
    }

    #[test]
    fn test_revert_restores_previous_version() {
        let dir = TempDir::new().unwrap();
        let c = coord(&dir);

        let (mut r, mut w) = rw(&[], &["v"]);
        let sid = c.enter("", &mut r, &mut w);
        c.revert(sid);

        let (mut r, mut w) = rw(&["v"], &[]);
        c.enter("", &mut r, &mut w);
        assert_eq!(r.items[0].version, 1);
    }

    #[test]
    fn test_state_file_tracks_max_commit() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state");
        let mut last = 0;
        {
            let c = Coordinator::new(SRC.to_string(), &state).unwrap();
            for _ in 0..3 {
                let (mut r, mut w) = rw(&[], &["v"]);
                last = c.enter("", &mut r, &mut w);
                c.commit(last);
            }
        }

        // restart: versions survive, new sids exceed all previous
        let c = Coordinator::new(SRC.to_string(), &state).unwrap();
        let (mut r, mut w) = rw(&["v"], &[]);
        let sid = c.enter("", &mut r, &mut w);
        assert_eq!(r.items[0].version, last);
        assert!(sid > last);
    }

    #[test]
    fn test_dropped_variable_forgotten_on_restart() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().join("state");
        {
            let c = Coordinator::new(SRC.to_string(), &state).unwrap();
            let (mut r, mut w) = rw(&[], &["w"]);
            let sid = c.enter("", &mut r, &mut w);
            c.commit(sid);
        }

        let c = Coordinator::new("type T { a int }\nvar v T;\n".to_string(), &state).unwrap();
        let text = fs::read_to_string(&state).unwrap();
        assert!(text.contains("v,"));
        assert!(!text.contains("w,"));
        drop(c);
    }

    #[test]
    fn test_liveness_without_conflicts() {
        // no running writer: enter must not block
        let dir = TempDir::new().unwrap();
        let c = coord(&dir);
        let (mut r, mut w) = rw(&["v", "w"], &[]);
        c.enter("", &mut r, &mut w);
        let (mut r2, mut w2) = rw(&["v"], &["w"]);
        c.enter("", &mut r2, &mut w2);
    }

    #[test]
    fn test_volume_sync_replaces_view() {
        let dir = TempDir::new().unwrap();
        let c = coord(&dir);

        let mut held = VarSet::new();
        held.put("v", 1);
        let out = c.volume_sync("127.0.0.1:9001", held);

        // both variables are authoritative at version 1; only the held one
        // resolves to the registered volume
        assert_eq!(out.len(), 2);
        let v = out.items.iter().find(|i| i.name == "v").unwrap();
        assert_eq!((v.version, v.volume.as_str()), (1, "127.0.0.1:9001"));
        let w = out.items.iter().find(|i| i.name == "w").unwrap();
        assert_eq!((w.version, w.volume.as_str()), (1, ""));

        // a replacement sync forgets the old view
        let out = c.volume_sync("127.0.0.1:9001", VarSet::new());
        assert!(out.items.iter().all(|i| i.volume.is_empty()));
    }

    #[test]
    fn test_dump_state_lists_entries_and_volumes() {
        let dir = TempDir::new().unwrap();
        let c = coord(&dir);
        let mut held = VarSet::new();
        held.put("v", 1);
        c.volume_sync("127.0.0.1:9001", held);

        let (mut r, mut w) = rw(&[], &["v"]);
        let sid = c.enter("", &mut r, &mut w);

        let dump = c.dump_state();
        assert!(dump.contains("VARIABLE"));
        assert!(dump.contains(&sid_to_str(sid)));
        assert!(dump.contains("RUNNABLE"));
        assert!(dump.contains("127.0.0.1:9001"));

        c.revert(sid);
    }

    #[test]
    fn test_write_volume_prefers_same_host() {
        let dir = TempDir::new().unwrap();
        let c = coord(&dir);
        c.volume_sync("10.0.0.1:9001", VarSet::new());
        c.volume_sync("10.0.0.2:9002", VarSet::new());

        let (mut r, mut w) = rw(&[], &["v"]);
        let sid = c.enter("10.0.0.1:7000", &mut r, &mut w);
        assert_eq!(w.items[0].volume, "10.0.0.1:9001");
        c.revert(sid);
    }
}

//! # Volume Store
//!
//! A volume owns a directory of versioned relation files named
//! `<var>-<16-hex-sid>`. Writes land in a `.part` file and are renamed
//! into place, so only whole files are ever visible; leftover partials are
//! deleted on startup. A periodic sync reconciles the directory against
//! the coordinator's authoritative set, deleting stale versions and
//! pulling missing ones from peer volumes. The volume itself never decodes
//! tuple data: files and wire transfers share the block framing, so serving
//! a read is a straight relay.

use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use tracing::{info, warn};

use crate::coordinator::CoordClient;
use crate::env::Environment;
use crate::error::{WireError, WireResult};
use crate::limits::MAX_BLOCK;
use crate::tuple::TupleBuf;
use crate::value::DataType;
use crate::wire::{
    self, read_i32, read_i64, sid_from_str, sid_to_str, write_i32, write_i64, VarSet, R_READ,
    R_WRITE, T_READ, T_WRITE,
};

const PART_SUFFIX: &str = ".part";

fn file_path(dir: &Path, name: &str, ver: i64, part: bool) -> PathBuf {
    let mut file = format!("{}-{}", name, sid_to_str(ver));
    if part {
        file.push_str(PART_SUFFIX);
    }
    dir.join(file)
}

/// Parse `<var>-<16-hex-sid>`; partial and foreign files yield `None`
pub fn parse_file_name(file: &str) -> Option<(String, i64)> {
    if file.ends_with(PART_SUFFIX) {
        return None;
    }
    let (name, sid_text) = file.rsplit_once('-')?;
    let sid = sid_from_str(sid_text)?;
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), sid))
}

/// Relay every framed block of `r` as wire chunks
fn relay_blocks<R: Read, W: Write>(r: &mut R, w: &mut W) -> WireResult<()> {
    let mut size_bytes = [0u8; 4];
    loop {
        match r.read_exact(&mut size_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        let size = u32::from_le_bytes(size_bytes) as usize;
        if size > MAX_BLOCK {
            return Err(WireError::ChunkTooLarge(size));
        }
        let mut block = vec![0u8; size];
        r.read_exact(&mut block)?;
        wire::write_chunk(w, &block)?;
    }
}

/// Receive wire chunks into framed blocks until the sentinel
fn receive_blocks<R: Read, W: Write>(r: &mut R, w: &mut W) -> WireResult<()> {
    while let Some(block) = wire::read_chunk(r)? {
        w.write_all(&(block.len() as u32).to_le_bytes())?;
        w.write_all(&block)?;
    }
    Ok(())
}

/// Receive a chunked stream into `<name>-<sid>.part` and rename into
/// place
fn write_file_from<R: Read>(dir: &Path, name: &str, ver: i64, r: &mut R) -> WireResult<()> {
    let part = file_path(dir, name, ver, true);
    let fin = file_path(dir, name, ver, false);

    let mut out = BufWriter::new(fs::File::create(&part)?);
    receive_blocks(r, &mut out)?;
    out.flush()?;
    drop(out);

    fs::rename(&part, &fin)?;
    Ok(())
}

/// Write already-framed file bytes through the same `.part` discipline
fn write_file_raw(dir: &Path, name: &str, ver: i64, bytes: &[u8]) -> WireResult<()> {
    let part = file_path(dir, name, ver, true);
    let fin = file_path(dir, name, ver, false);

    fs::write(&part, bytes)?;
    fs::rename(&part, &fin)?;
    Ok(())
}

// ---- executor-side client --------------------------------------------

/// Read one variable version from a volume, decoding into tuples. A
/// missing completion ack discards the transfer.
pub fn read(vid: &str, name: &str, ver: i64, types: &[DataType]) -> WireResult<TupleBuf> {
    let stream = TcpStream::connect(vid)?;
    let mut io = &stream;

    write_i32(&mut io, T_READ)?;
    wire::write_name(&mut io, name)?;
    write_i64(&mut io, ver)?;

    let body = wire::read_body(&mut io, types)?;
    wire::expect_tag(&mut io, R_READ)?;
    Ok(body)
}

/// Write one variable version to a volume and wait for the completion ack
pub fn write(vid: &str, body: &TupleBuf, name: &str, ver: i64) -> WireResult<()> {
    let stream = TcpStream::connect(vid)?;
    let mut io = &stream;

    write_i32(&mut io, T_WRITE)?;
    wire::write_name(&mut io, name)?;
    write_i64(&mut io, ver)?;
    wire::write_body(&mut io, body)?;

    wire::expect_tag(&mut io, R_WRITE)
}

// ---- the volume process ----------------------------------------------

pub struct Volume {
    dir: PathBuf,
    addr: String,
    gvars: Vec<String>,
    sync_interval: Duration,
}

impl Volume {
    /// Address this volume registers under
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Initialize a volume: check program compatibility, clean partial
    /// files, seed empty version-1 files, run the first sync, then serve
    /// in background threads. `port` 0 picks an ephemeral port.
    pub fn start(
        dir: &Path,
        port: u16,
        mut client: CoordClient,
        sync_interval: Duration,
    ) -> anyhow::Result<Volume> {
        fs::create_dir_all(dir).with_context(|| "cannot create the volume directory")?;

        let gvars = env_check(dir, &mut client)?;

        let listener = TcpListener::bind(("127.0.0.1", port))
            .with_context(|| format!("cannot bind volume port {port}"))?;
        let addr = listener.local_addr()?.to_string();

        info!(addr = %addr, dir = %dir.display(), "volume started");

        // partial files are junk from an interrupted run
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let fname = entry.file_name().to_string_lossy().to_string();
            if fname.ends_with(PART_SUFFIX) {
                let _ = fs::remove_file(entry.path());
            }
        }

        // every variable exists at version 1, possibly empty
        for name in &gvars {
            let fin = file_path(dir, name, 1, false);
            if !fin.exists() {
                let mut blocks = Vec::new();
                TupleBuf::new().write_blocks(&mut blocks)?;
                write_file_raw(dir, name, 1, &blocks)
                    .with_context(|| format!("cannot seed '{name}'"))?;
            }
        }

        let vol = Volume {
            dir: dir.to_path_buf(),
            addr,
            gvars,
            sync_interval,
        };

        // the coordinator learns the content right away
        vol.sync_once(&mut client)?;

        vol.spawn_sync(client);
        vol.spawn_serve(listener);
        Ok(vol)
    }

    fn spawn_sync(&self, mut client: CoordClient) {
        let vol = self.clone_parts();
        let interval = self.sync_interval;
        thread::spawn(move || loop {
            thread::sleep(interval);
            if let Err(e) = vol.sync_once(&mut client) {
                warn!(error = %format!("{e:#}"), "volume sync failed");
            }
        });
    }

    fn clone_parts(&self) -> Volume {
        Volume {
            dir: self.dir.clone(),
            addr: self.addr.clone(),
            gvars: self.gvars.clone(),
            sync_interval: self.sync_interval,
        }
    }

    /// The versions currently on disk
    fn disk_set(&self) -> anyhow::Result<VarSet> {
        let mut disk = VarSet::new();
        for entry in fs::read_dir(&self.dir)? {
            let fname = entry?.file_name().to_string_lossy().to_string();
            if let Some((name, ver)) = parse_file_name(&fname) {
                if ver > 0 {
                    disk.put(name, ver);
                }
            }
        }
        Ok(disk)
    }

    /// One reconciliation round. Runs inside an artificial transaction
    /// that writes every variable, which serializes the sync against
    /// concurrent writers; the transaction is reverted afterwards.
    fn sync_once(&self, client: &mut CoordClient) -> anyhow::Result<()> {
        let mut rset = VarSet::new();
        let mut wset = VarSet::new();
        for name in &self.gvars {
            wset.put(name, 0);
        }
        let sid = client.enter("", &mut rset, &mut wset)?;

        let disk = self.disk_set()?;
        let authoritative = client.volume_sync(&self.addr, &disk)?;

        // stale versions go away
        for held in &disk.items {
            if authoritative.scan(&held.name, held.version).is_none() {
                let _ = fs::remove_file(file_path(&self.dir, &held.name, held.version, false));
            }
        }

        // missing versions are pulled from their owning volumes
        for item in &authoritative.items {
            if disk.scan(&item.name, item.version).is_none() {
                self.copy_file(&item.name, item.version, &item.volume);
            }
        }

        client.revert(sid)?;
        Ok(())
    }

    /// Pull one version from a peer volume; failures only log, the next
    /// sync retries
    fn copy_file(&self, name: &str, ver: i64, vid: &str) {
        let fin = file_path(&self.dir, name, ver, false);
        if ver <= 1 || fin.exists() {
            return;
        }

        let started = Instant::now();
        let res = if vid.is_empty() {
            Err(WireError::Protocol("no volume holds the version".to_string()))
        } else {
            self.pull(name, ver, vid)
        };

        let elapsed = started.elapsed().as_millis() as u64;
        match res {
            Ok(()) => {
                info!(file = %format!("{}-{}", name, sid_to_str(ver)), from = vid, elapsed_ms = elapsed, "file copied");
            }
            Err(e) => {
                warn!(file = %format!("{}-{}", name, sid_to_str(ver)), from = vid, elapsed_ms = elapsed, error = %e, "file copy failed");
            }
        }
    }

    fn pull(&self, name: &str, ver: i64, vid: &str) -> WireResult<()> {
        let stream = TcpStream::connect(vid)?;
        let mut io = &stream;

        write_i32(&mut io, T_READ)?;
        wire::write_name(&mut io, name)?;
        write_i64(&mut io, ver)?;

        // spool the transfer first; only an acked one reaches the
        // directory
        let mut spool = Vec::new();
        receive_blocks(&mut io, &mut spool)?;
        wire::expect_tag(&mut io, R_READ)?;

        write_file_raw(&self.dir, name, ver, &spool)
    }

    fn spawn_serve(&self, listener: TcpListener) {
        let vol = self.clone_parts();
        thread::spawn(move || {
            for conn in listener.incoming() {
                match conn {
                    Ok(stream) => {
                        if let Err(e) = vol.serve_conn(&stream) {
                            warn!(error = %e, "volume request failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "volume accept failed"),
                }
            }
        });
    }

    /// One request per connection, served sequentially
    fn serve_conn(&self, stream: &TcpStream) -> WireResult<()> {
        let mut io = stream;
        let tag = read_i32(&mut io)?;
        let name = wire::read_name(&mut io)?;
        let ver = read_i64(&mut io)?;
        let file = format!("{}-{}", name, sid_to_str(ver));

        match tag {
            T_READ => {
                let f = fs::File::open(file_path(&self.dir, &name, ver, false))?;
                let mut r = BufReader::new(f);
                relay_blocks(&mut r, &mut io)?;
                wire::write_chunk_end(&mut io)?;
                write_i32(&mut io, R_READ)?;
                info!(file = %file, "file read");
                Ok(())
            }
            T_WRITE => {
                write_file_from(&self.dir, &name, ver, &mut io)?;
                write_i32(&mut io, R_WRITE)?;
                info!(file = %file, "file written");
                Ok(())
            }
            other => Err(WireError::Protocol(format!("unknown tag {other}"))),
        }
    }
}

/// Compatibility gate: the last-known program (at `<dir>/.source`) must
/// agree with the coordinator's on every shared variable's head. On
/// success the coordinator's program replaces the local copy. Returns the
/// global variable names.
fn env_check(dir: &Path, client: &mut CoordClient) -> anyhow::Result<Vec<String>> {
    let source_file = dir.join(".source");
    let old_text = match fs::read_to_string(&source_file) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e).with_context(|| "cannot read the volume source"),
    };

    let new_text = client.program().with_context(|| "cannot fetch the program")?;

    let old = Environment::parse(&old_text)
        .with_context(|| "cannot compile the stored program")?;
    let new = Environment::parse(&new_text)
        .with_context(|| "cannot compile the coordinator program")?;

    if !Environment::compat(&old, &new) {
        bail!("volume is incompatible with the coordinator program");
    }
    for (name, _) in old.vars() {
        if new.head(name).is_none() {
            warn!(var = name, "variable dropped from the program");
        }
    }

    fs::write(&source_file, new_text.as_bytes())
        .with_context(|| "cannot store the program")?;

    Ok(new.var_names())
}

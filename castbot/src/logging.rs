// logging.rs
//
// Registry avec un filtre par couche : `castbot-debug.log` reçoit tout
// à partir de DEBUG, `castbot.log` et la console suivent le niveau
// configuré, rechargeable à chaud. Les deux fichiers tournent par taille.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::Result;
use castconfig::Config;
use tracing::Level;
use tracing_subscriber::{
    Layer, Registry,
    filter::LevelFilter,
    fmt::MakeWriter,
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
};

pub const LOG_FILE_NAME: &str = "castbot.log";
pub const DEBUG_LOG_FILE_NAME: &str = "castbot-debug.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;
type LevelHandle = reload::Handle<LevelFilter, Registry>;

/// Handle kept by the binary to change the level at runtime.
///
/// The debug file is not affected.
#[derive(Clone)]
pub struct LogControl {
    handles: Vec<LevelHandle>,
}

impl LogControl {
    pub fn set_level(&self, level: &str) -> Result<LevelFilter> {
        let filter = string_to_level(level)
            .map(LevelFilter::from_level)
            .ok_or_else(|| {
                anyhow::anyhow!("Invalid log level. Must be one of: ERROR, WARN, INFO, DEBUG, TRACE")
            })?;
        for handle in &self.handles {
            handle.reload(filter)?;
        }
        Ok(filter)
    }
}

/// Installs the global subscriber from the `host.logger` section.
pub fn init_logging(config: &Config) -> Result<LogControl> {
    let level = string_to_level(&config.get_log_min_level())
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::INFO);

    let directory = config.get_log_directory()?;
    let (mut layers, mut control) = file_layers(
        Path::new(&directory),
        level,
        config.get_log_max_file_size() as u64,
        config.get_log_max_files(),
    )?;

    if config.get_log_enable_console() {
        let (filter, handle) = reload::Layer::new(level);
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
                .with_writer(io::stderr)
                .with_filter(filter)
                .boxed(),
        );
        control.handles.push(handle);
    }

    Registry::default().with(layers).try_init()?;
    Ok(control)
}

/// The two rotated files: everything from DEBUG, and the configured level.
fn file_layers(
    directory: &Path,
    level: LevelFilter,
    max_size: u64,
    max_files: usize,
) -> io::Result<(Vec<BoxedLayer>, LogControl)> {
    let debug_file = RotatingFile::open(directory.join(DEBUG_LOG_FILE_NAME), max_size, max_files)?;
    let file = RotatingFile::open(directory.join(LOG_FILE_NAME), max_size, max_files)?;
    let (filter, handle) = reload::Layer::new(level);

    let layers = vec![
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(debug_file)
            .with_filter(LevelFilter::DEBUG)
            .boxed(),
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(file)
            .with_filter(filter)
            .boxed(),
    ];
    Ok((layers, LogControl { handles: vec![handle] }))
}

fn string_to_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" | "WARNING" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

struct FileState {
    file: File,
    written: u64,
}

/// Size-rotated log file: `castbot.log`, `castbot.log.1` ... `castbot.log.N`.
#[derive(Clone)]
pub struct RotatingFile {
    path: PathBuf,
    max_size: u64,
    max_files: usize,
    state: Arc<Mutex<FileState>>,
}

impl RotatingFile {
    pub fn open(path: PathBuf, max_size: u64, max_files: usize) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_size,
            max_files,
            state: Arc::new(Mutex::new(FileState { file, written })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FileState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn generation(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn rotate(&self, state: &mut FileState) -> io::Result<()> {
        state.file.flush()?;
        if self.max_files == 0 {
            state.file = File::create(&self.path)?;
            state.written = 0;
            return Ok(());
        }
        let oldest = self.generation(self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.max_files).rev() {
            let from = self.generation(n);
            if from.exists() {
                fs::rename(&from, self.generation(n + 1))?;
            }
        }
        fs::rename(&self.path, self.generation(1))?;
        state.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        state.written = 0;
        Ok(())
    }

    fn write_record(&self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if self.max_size > 0 && state.written > 0 && state.written + buf.len() as u64 > self.max_size {
            self.rotate(&mut state)?;
        }
        state.file.write_all(buf)?;
        state.written += buf.len() as u64;
        Ok(buf.len())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_record(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().file.flush()
    }
}

impl<'a> MakeWriter<'a> for RotatingFile {
    type Writer = RotatingFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

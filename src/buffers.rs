use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

/// Buffers above this capacity are dropped instead of pooled so a single
/// huge program output cannot pin memory forever.
const MAX_POOLED_CAPACITY: usize = 1024 * 1024;
const MAX_POOLED_BUFFERS: usize = 16;
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Reusable string buffers for reading program output files.
pub struct BufferPool {
    strings: parking_lot::Mutex<Vec<String>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            strings: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn get_string(&self) -> String {
        let mut pool = self.strings.lock();
        pool.pop().unwrap_or_else(|| String::with_capacity(INITIAL_CAPACITY))
    }

    pub fn return_string(&self, mut s: String) {
        s.clear();
        if s.capacity() <= MAX_POOLED_CAPACITY {
            let mut pool = self.strings.lock();
            if pool.len() < MAX_POOLED_BUFFERS {
                pool.push(s);
            }
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

static BUFFER_POOL: OnceLock<BufferPool> = OnceLock::new();

pub fn get_buffer_pool() -> &'static BufferPool {
    BUFFER_POOL.get_or_init(BufferPool::new)
}

/// Reads a whole file through the buffer pool. Missing or unreadable files
/// read as empty, matching how absent output files are treated.
pub fn read_file_if_exists(path: &Path) -> String {
    let Ok(mut file) = File::open(path) else {
        return String::new();
    };
    let pool = get_buffer_pool();
    let mut buf = pool.get_string();
    let content = match file.read_to_string(&mut buf) {
        Ok(_) => buf.as_str().to_owned(),
        Err(_) => String::new(),
    };
    pool.return_string(buf);
    content
}

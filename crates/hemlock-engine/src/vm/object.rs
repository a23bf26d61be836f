//! Heap payloads for the tagged value union.
//!
//! Every payload is `Send + Sync`: interior mutability goes through
//! parking_lot locks so values can cross task boundaries, and the enclosing
//! `Arc` provides the atomic reference count. Channel and task payloads live
//! in their own modules ([`crate::vm::channel`], [`crate::vm::task`]).

use crate::parser::ast::FunctionLit;
use crate::vm::env::Environment;
use crate::vm::value::Value;
use parking_lot::{Mutex, RwLock};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

// ============================================================================
// String
// ============================================================================

/// Mutable UTF-8 string payload.
///
/// Stores raw bytes plus a lazily computed code-point length (−1 = not
/// cached). Byte-index writes are permitted and may transiently break UTF-8;
/// code-point operations decode lossily in that case.
pub struct StrPayload {
    bytes: RwLock<Vec<u8>>,
    char_len: AtomicI64,
}

impl StrPayload {
    pub fn new(text: String) -> Self {
        Self {
            bytes: RwLock::new(text.into_bytes()),
            char_len: AtomicI64::new(-1),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
            char_len: AtomicI64::new(-1),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.read().len()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.read().capacity()
    }

    /// Code-point length, computed on first use and cached until mutation.
    pub fn char_len(&self) -> usize {
        let cached = self.char_len.load(Ordering::Acquire);
        if cached >= 0 {
            return cached as usize;
        }
        let len = String::from_utf8_lossy(&self.bytes.read()).chars().count();
        self.char_len.store(len as i64, Ordering::Release);
        len
    }

    pub fn bytes_snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes.read()).into_owned()
    }

    /// The code point at code-point index `i`, decoding UTF-8 at the byte
    /// offset of the i-th code point.
    pub fn char_at(&self, index: usize) -> Option<char> {
        let bytes = self.bytes.read();
        String::from_utf8_lossy(&bytes).chars().nth(index)
    }

    pub fn byte_at(&self, index: usize) -> Option<u8> {
        self.bytes.read().get(index).copied()
    }

    /// Byte-index write. Invalidates the cached code-point length.
    pub fn set_byte(&self, index: usize, byte: u8) -> bool {
        let mut bytes = self.bytes.write();
        match bytes.get_mut(index) {
            Some(slot) => {
                *slot = byte;
                self.char_len.store(-1, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Append, growing capacity as needed.
    pub fn append(&self, text: &str) {
        self.bytes.write().extend_from_slice(text.as_bytes());
        self.char_len.store(-1, Ordering::Release);
    }

    pub fn clone_payload(&self) -> StrPayload {
        StrPayload::from_bytes(self.bytes_snapshot())
    }
}

impl std::fmt::Debug for StrPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StrPayload({:?})", self.to_string_lossy())
    }
}

// ============================================================================
// Array
// ============================================================================

/// Dense vector of values. Growth is Vec's geometric growth; each element
/// slot owns one retain.
pub struct ArrayPayload {
    items: RwLock<Vec<Value>>,
}

impl ArrayPayload {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.read().get(index).cloned()
    }

    pub fn set(&self, index: usize, value: Value) -> bool {
        let mut items = self.items.write();
        match items.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, value: Value) {
        self.items.write().push(value);
    }

    pub fn pop(&self) -> Option<Value> {
        self.items.write().pop()
    }

    pub fn shift(&self) -> Option<Value> {
        let mut items = self.items.write();
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    }

    pub fn unshift(&self, value: Value) {
        self.items.write().insert(0, value);
    }

    pub fn insert(&self, index: usize, value: Value) -> bool {
        let mut items = self.items.write();
        if index > items.len() {
            return false;
        }
        items.insert(index, value);
        true
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let mut items = self.items.write();
        if index < items.len() {
            Some(items.remove(index))
        } else {
            None
        }
    }

    pub fn reverse(&self) {
        self.items.write().reverse();
    }

    /// Clone of the element vector; used for iteration without holding the
    /// lock across user code.
    pub fn snapshot(&self) -> Vec<Value> {
        self.items.read().clone()
    }
}

impl std::fmt::Debug for ArrayPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArrayPayload(len={})", self.len())
    }
}

// ============================================================================
// Object
// ============================================================================

struct ObjectInner {
    /// Field names in insertion order
    names: Vec<String>,
    /// Field values, parallel to `names`
    values: Vec<Value>,
}

/// Dynamic object payload: insertion-ordered parallel name/value vectors
/// plus an optional nominal type tag set by `define` conversion.
pub struct ObjectPayload {
    inner: RwLock<ObjectInner>,
    type_name: RwLock<Option<String>>,
}

impl ObjectPayload {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(ObjectInner {
                names: Vec::new(),
                values: Vec::new(),
            }),
            type_name: RwLock::new(None),
        }
    }

    pub fn with_type(type_name: Option<String>) -> Self {
        let obj = Self::new();
        *obj.type_name.write() = type_name;
        obj
    }

    pub fn type_name(&self) -> Option<String> {
        self.type_name.read().clone()
    }

    pub fn set_type_name(&self, name: Option<String>) {
        *self.type_name.write() = name;
    }

    pub fn field_count(&self) -> usize {
        self.inner.read().names.len()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let inner = self.inner.read();
        inner
            .names
            .iter()
            .position(|n| n == name)
            .map(|i| inner.values[i].clone())
    }

    pub fn has(&self, name: &str) -> bool {
        self.inner.read().names.iter().any(|n| n == name)
    }

    /// Assign a field, appending it when the name is unknown.
    pub fn set(&self, name: &str, value: Value) {
        let mut inner = self.inner.write();
        match inner.names.iter().position(|n| n == name) {
            Some(i) => inner.values[i] = value,
            None => {
                inner.names.push(name.to_string());
                inner.values.push(value);
            }
        }
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        let mut inner = self.inner.write();
        let index = inner.names.iter().position(|n| n == name)?;
        inner.names.remove(index);
        Some(inner.values.remove(index))
    }

    /// Insertion-ordered (name, value) pairs.
    pub fn snapshot(&self) -> Vec<(String, Value)> {
        let inner = self.inner.read();
        inner
            .names
            .iter()
            .cloned()
            .zip(inner.values.iter().cloned())
            .collect()
    }
}

impl Default for ObjectPayload {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ObjectPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectPayload(fields={})", self.field_count())
    }
}

// ============================================================================
// Buffer
// ============================================================================

/// Raw byte region with length and capacity; bounds-checked on index.
pub struct BufferPayload {
    bytes: RwLock<Vec<u8>>,
}

impl BufferPayload {
    pub fn new(len: usize) -> Self {
        Self {
            bytes: RwLock::new(vec![0u8; len]),
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: RwLock::new(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.read().capacity()
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        self.bytes.read().get(index).copied()
    }

    pub fn set(&self, index: usize, byte: u8) -> bool {
        let mut bytes = self.bytes.write();
        match bytes.get_mut(index) {
            Some(slot) => {
                *slot = byte;
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Raw address of the first byte. The address is only stable while the
    /// buffer is neither grown nor freed; misuse is the program's problem,
    /// as with any `ptr`.
    pub fn as_ptr_addr(&self) -> usize {
        self.bytes.read().as_ptr() as usize
    }

    pub fn clone_payload(&self) -> BufferPayload {
        BufferPayload::from_bytes(self.snapshot())
    }
}

impl std::fmt::Debug for BufferPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BufferPayload(len={})", self.len())
    }
}

// ============================================================================
// Function
// ============================================================================

/// A function value: the shared declaration plus the captured closure
/// environment. The closure retains its defining scope exactly once.
pub struct FunctionPayload {
    decl: Arc<FunctionLit>,
    env: Arc<Environment>,
}

impl FunctionPayload {
    pub fn new(decl: Arc<FunctionLit>, env: Arc<Environment>) -> Self {
        Self { decl, env }
    }

    pub fn decl(&self) -> &Arc<FunctionLit> {
        &self.decl
    }

    pub fn env(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn is_async(&self) -> bool {
        self.decl.is_async
    }
}

impl std::fmt::Debug for FunctionPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FunctionPayload({})", self.name())
    }
}

// ============================================================================
// File
// ============================================================================

/// An open file with an explicit, idempotent close.
pub struct FileHandle {
    path: String,
    mode: String,
    fd: i32,
    file: Mutex<Option<std::fs::File>>,
}

impl FileHandle {
    pub fn open(path: &str, mode: &str) -> std::io::Result<Self> {
        let mut options = std::fs::OpenOptions::new();
        match mode {
            "r" => {
                options.read(true);
            }
            "w" => {
                options.write(true).create(true).truncate(true);
            }
            "a" => {
                options.append(true).create(true);
            }
            "r+" => {
                options.read(true).write(true);
            }
            "w+" => {
                options.read(true).write(true).create(true).truncate(true);
            }
            _ => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("invalid open mode `{}`", mode),
                ))
            }
        }
        let file = options.open(path)?;
        #[cfg(unix)]
        let fd = {
            use std::os::unix::io::AsRawFd;
            file.as_raw_fd()
        };
        #[cfg(not(unix))]
        let fd = -1;
        Ok(Self {
            path: path.to_string(),
            mode: mode.to_string(),
            fd,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    pub fn fd(&self) -> i32 {
        self.fd
    }

    pub fn is_closed(&self) -> bool {
        self.file.lock().is_none()
    }

    /// Idempotent close; only the first call has effect.
    pub fn close(&self) {
        self.file.lock().take();
    }

    pub fn read_all(&self) -> Result<Vec<u8>, String> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or("read on closed file")?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| e.to_string())?;
        Ok(buf)
    }

    pub fn read_n(&self, n: usize) -> Result<Vec<u8>, String> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or("read on closed file")?;
        let mut buf = vec![0u8; n];
        let read = file.read(&mut buf).map_err(|e| e.to_string())?;
        buf.truncate(read);
        Ok(buf)
    }

    pub fn write_bytes(&self, bytes: &[u8]) -> Result<usize, String> {
        let mut guard = self.file.lock();
        let file = guard.as_mut().ok_or("write on closed file")?;
        file.write_all(bytes).map_err(|e| e.to_string())?;
        Ok(bytes.len())
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FileHandle({}, closed={})", self.path, self.is_closed())
    }
}

// ============================================================================
// Socket
// ============================================================================

enum SocketInner {
    Stream(TcpStream),
    Listener(TcpListener),
    Closed,
}

/// A TCP socket (stream or listener) with an explicit, idempotent close.
pub struct SocketHandle {
    address: String,
    port: u16,
    fd: i32,
    inner: Mutex<SocketInner>,
}

impl SocketHandle {
    pub fn connect(address: &str, port: u16) -> std::io::Result<Self> {
        let stream = TcpStream::connect((address, port))?;
        #[cfg(unix)]
        let fd = {
            use std::os::unix::io::AsRawFd;
            stream.as_raw_fd()
        };
        #[cfg(not(unix))]
        let fd = -1;
        Ok(Self {
            address: address.to_string(),
            port,
            fd,
            inner: Mutex::new(SocketInner::Stream(stream)),
        })
    }

    pub fn listen(address: &str, port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind((address, port))?;
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
        #[cfg(unix)]
        let fd = {
            use std::os::unix::io::AsRawFd;
            listener.as_raw_fd()
        };
        #[cfg(not(unix))]
        let fd = -1;
        Ok(Self {
            address: address.to_string(),
            port,
            fd,
            inner: Mutex::new(SocketInner::Listener(listener)),
        })
    }

    fn from_stream(stream: TcpStream) -> Self {
        let (address, port) = stream
            .peer_addr()
            .map(|a| (a.ip().to_string(), a.port()))
            .unwrap_or_else(|_| ("?".to_string(), 0));
        #[cfg(unix)]
        let fd = {
            use std::os::unix::io::AsRawFd;
            stream.as_raw_fd()
        };
        #[cfg(not(unix))]
        let fd = -1;
        Self {
            address,
            port,
            fd,
            inner: Mutex::new(SocketInner::Stream(stream)),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn fd(&self) -> i32 {
        self.fd
    }

    pub fn describe(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.lock(), SocketInner::Closed)
    }

    /// Idempotent close; only the first call has effect.
    pub fn close(&self) {
        *self.inner.lock() = SocketInner::Closed;
    }

    pub fn accept(&self) -> Result<SocketHandle, String> {
        let guard = self.inner.lock();
        match &*guard {
            SocketInner::Listener(listener) => {
                let (stream, _) = listener.accept().map_err(|e| e.to_string())?;
                Ok(SocketHandle::from_stream(stream))
            }
            SocketInner::Stream(_) => Err("accept on a connected socket".to_string()),
            SocketInner::Closed => Err("accept on closed socket".to_string()),
        }
    }

    pub fn send_bytes(&self, bytes: &[u8]) -> Result<usize, String> {
        let mut guard = self.inner.lock();
        match &mut *guard {
            SocketInner::Stream(stream) => {
                stream.write_all(bytes).map_err(|e| e.to_string())?;
                Ok(bytes.len())
            }
            SocketInner::Listener(_) => Err("send on a listening socket".to_string()),
            SocketInner::Closed => Err("send on closed socket".to_string()),
        }
    }

    pub fn recv_n(&self, n: usize) -> Result<Vec<u8>, String> {
        let mut guard = self.inner.lock();
        match &mut *guard {
            SocketInner::Stream(stream) => {
                let mut buf = vec![0u8; n];
                let read = stream.read(&mut buf).map_err(|e| e.to_string())?;
                buf.truncate(read);
                Ok(buf)
            }
            SocketInner::Listener(_) => Err("recv on a listening socket".to_string()),
            SocketInner::Closed => Err("recv on closed socket".to_string()),
        }
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SocketHandle({}, closed={})", self.describe(), self.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_char_len_caching() {
        let s = StrPayload::new("héllo".to_string());
        assert_eq!(s.byte_len(), 6);
        assert_eq!(s.char_len(), 5);
        // Mutation invalidates the cache
        s.append("é");
        assert_eq!(s.char_len(), 6);
    }

    #[test]
    fn test_string_char_at() {
        let s = StrPayload::new("aé€".to_string());
        assert_eq!(s.char_at(0), Some('a'));
        assert_eq!(s.char_at(1), Some('é'));
        assert_eq!(s.char_at(2), Some('€'));
        assert_eq!(s.char_at(3), None);
    }

    #[test]
    fn test_string_byte_write() {
        let s = StrPayload::new("abc".to_string());
        assert!(s.set_byte(1, b'X'));
        assert_eq!(s.to_string_lossy(), "aXc");
        assert!(!s.set_byte(3, b'Y'));
    }

    #[test]
    fn test_array_ops() {
        let a = ArrayPayload::new(vec![Value::I32(1), Value::I32(2)]);
        a.push(Value::I32(3));
        assert_eq!(a.len(), 3);
        assert_eq!(a.pop(), Some(Value::I32(3)));
        assert_eq!(a.shift(), Some(Value::I32(1)));
        a.unshift(Value::I32(0));
        assert_eq!(a.get(0), Some(Value::I32(0)));
        assert!(!a.set(9, Value::Null));
    }

    #[test]
    fn test_object_insertion_order() {
        let o = ObjectPayload::new();
        o.set("b", Value::I32(1));
        o.set("a", Value::I32(2));
        o.set("b", Value::I32(3));
        let fields = o.snapshot();
        assert_eq!(fields[0].0, "b");
        assert_eq!(fields[0].1, Value::I32(3));
        assert_eq!(fields[1].0, "a");
    }

    #[test]
    fn test_buffer_bounds() {
        let b = BufferPayload::new(4);
        assert!(b.set(3, 0xFF));
        assert_eq!(b.get(3), Some(0xFF));
        assert!(!b.set(4, 0));
        assert_eq!(b.get(4), None);
    }

    #[test]
    fn test_file_close_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let file = FileHandle::open(path.to_str().unwrap(), "w").unwrap();
        assert!(!file.is_closed());
        file.close();
        assert!(file.is_closed());
        file.close();
        assert!(file.is_closed());
        assert!(file.write_bytes(b"x").is_err());
    }
}

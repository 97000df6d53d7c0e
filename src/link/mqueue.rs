//! POSIX message queue wrapper.
//!
//! A [`MessageQueue`] is one end of a named, bounded, kernel-managed queue of
//! byte messages (`mq_open(3)`). Both ends open the same [`QueueName`] and
//! the first one to open it creates it. The receiving end removes the name
//! when it closes; a sender left holding the removed queue opens the name
//! again on its next send.
//!
//! Descriptors are always non-blocking. Waiting for data is done with
//! `poll(2)` on the queue descriptor together with an eventfd, so a blocked
//! waiter can be released by [`MessageQueue::shutdown`] from any thread.
//!
//! # Closing
//!
//! The descriptor lives behind an `RwLock`: every syscall holds the read
//! lock, and [`MessageQueue::close`] takes the write lock after waking any
//! waiter. A descriptor is therefore never closed while another thread is
//! using it, and closing is idempotent.

use crate::config::{MAX_QUEUE_NAME_LEN, QueueConfig};
use crate::error::{Error, Result};
use rustix::event::{EventfdFlags, PollFd, PollFlags, eventfd, poll};
use rustix::fd::{BorrowedFd, OwnedFd};
use rustix::io::Errno;
use std::ffi::CString;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

/// Permission bits for created queues.
const QUEUE_MODE: libc::mode_t = 0o600;

/// Attempts at the create-or-open race before giving up.
const OPEN_ATTEMPTS: usize = 4;

/// Name segment marking the publisher-to-subscriber flow direction.
const FLOW_SEGMENT: &str = "pub";

// ============================================================================
// QueueName
// ============================================================================

/// Validated OS queue name (`/` followed by at most 254 portable characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueName(String);

impl QueueName {
    /// Derive the queue name carrying samples of `type_name` on `topic`.
    ///
    /// Sender and receiver derive the same name independently:
    /// `/{prefix}{topic}.pub.{hash}`, where the topic has `/` mapped to `.`
    /// and other non-portable characters mapped to `_`, and `hash` is a
    /// 64-bit FNV-1a digest of the unmodified topic and the type name. The
    /// hash keeps names distinct when sanitizing or truncation collapses two
    /// topics, and keeps differently typed streams apart.
    pub fn derive(prefix: &str, topic: &str, type_name: &str) -> Result<Self> {
        validate_topic(topic)?;

        let hash = fnv1a64(&[topic.as_bytes(), &[0], type_name.as_bytes()]);
        let suffix = format!(".{FLOW_SEGMENT}.{hash:016x}");

        let mut name = String::with_capacity(MAX_QUEUE_NAME_LEN);
        name.push('/');
        push_sanitized(&mut name, prefix);
        push_sanitized(&mut name, topic.trim_start_matches('/'));

        let budget = MAX_QUEUE_NAME_LEN.saturating_sub(suffix.len());
        if name.len() > budget {
            // Sanitized names are ASCII, any byte index is a char boundary.
            name.truncate(budget);
        }
        name.push_str(&suffix);
        Ok(Self(name))
    }

    /// Use `name` verbatim after checking it is a valid queue name.
    pub fn from_raw(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let valid = name.len() > 1
            && name.len() <= MAX_QUEUE_NAME_LEN
            && name.starts_with('/')
            && !name[1..].contains('/')
            && !name.contains('\0');
        if valid {
            Ok(Self(name))
        } else {
            Err(Error::InvalidTopic(name))
        }
    }

    /// The name including the leading `/`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_cstring(&self) -> Result<CString> {
        CString::new(self.0.as_str()).map_err(|_| Error::InvalidTopic(self.0.clone()))
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reject topic names that cannot be carried in any queue name.
pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.contains('\0') || topic.chars().any(char::is_whitespace) {
        return Err(Error::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

fn push_sanitized(out: &mut String, segment: &str) {
    out.extend(segment.chars().map(|c| match c {
        '/' => '.',
        c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
        _ => '_',
    }));
}

fn fnv1a64(parts: &[&[u8]]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    parts
        .iter()
        .flat_map(|part| part.iter())
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}

// ============================================================================
// MessageQueue
// ============================================================================

/// Which end of a queue a descriptor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Opened write-only.
    Sender,
    /// Opened read-only.
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sender => f.write_str("sender"),
            Self::Receiver => f.write_str("receiver"),
        }
    }
}

/// Outcome of [`MessageQueue::wait_readable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// At least one message can be received.
    Readable,
    /// The queue was shut down; stop waiting.
    Closed,
}

/// A descriptor together with the attributes it was opened with.
#[derive(Debug, Clone, Copy)]
struct OpenQueue {
    mqd: libc::mqd_t,
    created: bool,
    capacity: usize,
    max_message_size: usize,
}

impl OpenQueue {
    fn open(name: &CString, role: Role, config: &QueueConfig) -> Result<Self> {
        let (mqd, created) = open_descriptor(name, role, config)?;
        match get_attr(mqd) {
            Ok(attr) => Ok(Self {
                mqd,
                created,
                capacity: usize::try_from(attr.mq_maxmsg).unwrap_or(0),
                max_message_size: usize::try_from(attr.mq_msgsize).unwrap_or(0),
            }),
            Err(e) => {
                Self {
                    mqd,
                    created,
                    capacity: 0,
                    max_message_size: 0,
                }
                .discard(name);
                Err(e)
            }
        }
    }

    /// Whether the name this queue was opened under has been removed.
    ///
    /// An unlinked queue keeps working for the descriptors still open on it,
    /// but nobody can find it by name any more.
    fn is_orphaned(&self) -> bool {
        // SAFETY: on Linux a mqd_t is a file descriptor, and the caller keeps
        // it open for the duration of this call.
        let fd = unsafe { BorrowedFd::borrow_raw(self.mqd) };
        rustix::fs::fstat(fd).is_ok_and(|stat| stat.st_nlink == 0)
    }

    fn close(self) {
        // SAFETY: `mqd` came from a successful mq_open and the caller no
        // longer shares it.
        unsafe { libc::mq_close(self.mqd) };
    }

    /// Close a queue that never became usable, removing it if we created it.
    fn discard(self, name: &CString) {
        self.close();
        if self.created {
            // SAFETY: `name` is a valid NUL-terminated string.
            unsafe { libc::mq_unlink(name.as_ptr()) };
        }
    }
}

/// One open end of a POSIX message queue.
///
/// The receiving end owns the name: closing a receiver removes it. A sender
/// never removes the name, and when it finds its queue was removed under it
/// (the receiver went away) it reopens the name before the next send. This
/// lets either side restart without the other noticing.
pub struct MessageQueue {
    name: QueueName,
    cname: CString,
    role: Role,
    config: QueueConfig,
    state: RwLock<Option<OpenQueue>>,
    wake: OwnedFd,
    shutdown: AtomicBool,
}

impl MessageQueue {
    /// Open (or create) `name` for `role`.
    ///
    /// When the queue already exists its attributes win over `config`; the
    /// effective limits are available through [`capacity`](Self::capacity)
    /// and [`max_message_size`](Self::max_message_size).
    pub fn open(name: QueueName, role: Role, config: &QueueConfig) -> Result<Self> {
        let cname = name.to_cstring()?;
        let queue = OpenQueue::open(&cname, role, config)?;
        let wake = match eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK) {
            Ok(wake) => wake,
            Err(e) => {
                queue.discard(&cname);
                return Err(e.into());
            }
        };

        tracing::debug!(
            queue = %name,
            %role,
            created = queue.created,
            capacity = queue.capacity,
            max_message_size = queue.max_message_size,
            "opened message queue"
        );

        Ok(Self {
            name,
            cname,
            role,
            config: config.clone(),
            state: RwLock::new(Some(queue)),
            wake,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Queue name.
    pub fn name(&self) -> &QueueName {
        &self.name
    }

    /// Which end this is.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the current descriptor created the queue.
    pub fn is_creator(&self) -> bool {
        self.current().is_some_and(|queue| queue.created)
    }

    /// Effective maximum number of queued messages (0 once closed).
    pub fn capacity(&self) -> usize {
        self.current().map_or(0, |queue| queue.capacity)
    }

    /// Effective maximum message size in bytes (0 once closed).
    pub fn max_message_size(&self) -> usize {
        self.current().map_or(0, |queue| queue.max_message_size)
    }

    /// Enqueue one message without blocking.
    ///
    /// A full queue fails with [`Error::EnqueueFailed`]; the message is not
    /// sent and nothing else is affected. If the queue's name was removed
    /// since it was opened, the name is opened again first.
    pub fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.role != Role::Sender {
            return Err(Error::WrongDirection("queue receiver"));
        }

        let mut guard = self.descriptor()?;
        if guard.is_some_and(|queue| queue.is_orphaned()) {
            drop(guard);
            self.reopen()?;
            guard = self.descriptor()?;
        }
        let Some(queue) = *guard else {
            return Err(Error::QueueClosed);
        };
        if bytes.len() > queue.max_message_size {
            return Err(Error::MessageTooLarge {
                len: bytes.len(),
                max: queue.max_message_size,
            });
        }

        // SAFETY: `mqd` is open while the read guard is held; the pointer and
        // length describe `bytes`.
        let rc = unsafe { libc::mq_send(queue.mqd, bytes.as_ptr().cast(), bytes.len(), 0) };
        if rc == -1 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::EAGAIN) => Error::EnqueueFailed,
                Some(libc::EMSGSIZE) => Error::MessageTooLarge {
                    len: bytes.len(),
                    max: queue.max_message_size,
                },
                _ => Error::Io(err),
            });
        }
        Ok(())
    }

    /// Dequeue one message into `buf` without blocking.
    ///
    /// Returns `false` when the queue is empty. `buf` is resized to the
    /// message length.
    pub fn try_receive(&self, buf: &mut Vec<u8>) -> Result<bool> {
        if self.role != Role::Receiver {
            return Err(Error::WrongDirection("queue sender"));
        }

        let guard = self.descriptor()?;
        let Some(queue) = *guard else {
            return Err(Error::QueueClosed);
        };
        buf.resize(queue.max_message_size, 0);
        // SAFETY: `mqd` is open while the read guard is held; `buf` has room
        // for `max_message_size` bytes, which the kernel requires.
        let received = unsafe {
            libc::mq_receive(
                queue.mqd,
                buf.as_mut_ptr().cast(),
                buf.len(),
                std::ptr::null_mut(),
            )
        };
        if received < 0 {
            buf.clear();
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(false),
                _ => Err(Error::Io(err)),
            };
        }
        buf.truncate(received.unsigned_abs());
        Ok(true)
    }

    /// Number of messages currently queued.
    pub fn pending(&self) -> Result<usize> {
        let guard = self.descriptor()?;
        let Some(queue) = *guard else {
            return Err(Error::QueueClosed);
        };
        let attr = get_attr(queue.mqd)?;
        Ok(usize::try_from(attr.mq_curmsgs).unwrap_or(0))
    }

    /// Block until a message can be received or the queue is shut down.
    pub fn wait_readable(&self) -> Result<Readiness> {
        if self.role != Role::Receiver {
            return Err(Error::WrongDirection("queue sender"));
        }

        loop {
            if self.is_shutdown() {
                return Ok(Readiness::Closed);
            }
            let guard = self.descriptor()?;
            let Some(queue) = *guard else {
                return Ok(Readiness::Closed);
            };
            // SAFETY: on Linux a mqd_t is a file descriptor, open while the
            // read guard is held.
            let queue_fd = unsafe { BorrowedFd::borrow_raw(queue.mqd) };
            let mut fds = [
                PollFd::new(&queue_fd, PollFlags::IN),
                PollFd::new(&self.wake, PollFlags::IN),
            ];
            match poll(&mut fds, None) {
                Ok(_) => {}
                Err(Errno::INTR) => continue,
                Err(e) => return Err(e.into()),
            }

            if self.is_shutdown() || !fds[1].revents().is_empty() {
                return Ok(Readiness::Closed);
            }
            let events = fds[0].revents();
            if events.contains(PollFlags::IN) {
                return Ok(Readiness::Readable);
            }
            if events.intersects(PollFlags::ERR | PollFlags::HUP | PollFlags::NVAL) {
                return Err(Error::QueueClosed);
            }
        }
    }

    /// Release any thread blocked in [`wait_readable`](Self::wait_readable)
    /// and make future waits return [`Readiness::Closed`]. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = rustix::io::write(&self.wake, &1u64.to_ne_bytes()) {
            tracing::warn!(queue = %self.name, error = %e, "failed to signal queue shutdown");
        }
    }

    /// Whether [`shutdown`](Self::shutdown) was called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Shut down and close the descriptor. A receiver also removes the name,
    /// unless it was already removed. Idempotent.
    pub fn close(&self) {
        self.shutdown();
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(queue) = guard.take() else {
            return;
        };
        // Checked before closing: once the name is gone it may already
        // belong to a newer queue.
        let owns_name = self.role == Role::Receiver && !queue.is_orphaned();
        queue.close();
        if owns_name {
            if let Err(e) = unlink(&self.name) {
                tracing::warn!(queue = %self.name, error = %e, "failed to unlink message queue");
            }
        }
        tracing::debug!(queue = %self.name, role = %self.role, "closed message queue");
    }

    /// Whether the descriptor has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.read().map(|guard| guard.is_none()).unwrap_or(true)
    }

    /// Swap an orphaned descriptor for one on the queue now carrying the name,
    /// creating it if nobody has yet.
    fn reopen(&self) -> Result<()> {
        let mut guard = self.state.write().map_err(|_| Error::QueueClosed)?;
        let Some(stale) = *guard else {
            return Err(Error::QueueClosed);
        };
        if !stale.is_orphaned() {
            // Another thread got here first.
            return Ok(());
        }
        let fresh = OpenQueue::open(&self.cname, self.role, &self.config)?;
        stale.close();
        *guard = Some(fresh);
        tracing::debug!(
            queue = %self.name,
            role = %self.role,
            created = fresh.created,
            "reopened message queue after its name was removed"
        );
        Ok(())
    }

    fn current(&self) -> Option<OpenQueue> {
        self.state.read().ok().and_then(|guard| *guard)
    }

    fn descriptor(&self) -> Result<RwLockReadGuard<'_, Option<OpenQueue>>> {
        self.state.read().map_err(|_| Error::QueueClosed)
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("open", &self.current())
            .finish()
    }
}

/// Remove a queue name from the system. Missing names are not an error.
pub fn unlink(name: &QueueName) -> Result<()> {
    let cname = name.to_cstring()?;
    // SAFETY: `cname` is a valid NUL-terminated string.
    if unsafe { libc::mq_unlink(cname.as_ptr()) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ENOENT) {
            return Err(err.into());
        }
    }
    Ok(())
}

fn open_descriptor(name: &CString, role: Role, config: &QueueConfig) -> Result<(libc::mqd_t, bool)> {
    let access = match role {
        Role::Sender => libc::O_WRONLY,
        Role::Receiver => libc::O_RDONLY,
    };
    let flags = access | libc::O_NONBLOCK | libc::O_CLOEXEC;

    // SAFETY: mq_attr is plain old data; all-zero is a valid value.
    let mut attr: libc::mq_attr = unsafe { std::mem::zeroed() };
    attr.mq_maxmsg = libc::c_long::try_from(config.capacity).unwrap_or(libc::c_long::MAX);
    attr.mq_msgsize = libc::c_long::try_from(config.max_message_size).unwrap_or(libc::c_long::MAX);

    for _ in 0..OPEN_ATTEMPTS {
        // SAFETY: `name` is NUL-terminated and `attr` outlives the call.
        let mqd = unsafe {
            libc::mq_open(
                name.as_ptr(),
                flags | libc::O_CREAT | libc::O_EXCL,
                QUEUE_MODE,
                &mut attr as *mut libc::mq_attr,
            )
        };
        if mqd != -1 {
            return Ok((mqd, true));
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(err.into());
        }

        // SAFETY: `name` is NUL-terminated.
        let mqd = unsafe { libc::mq_open(name.as_ptr(), flags) };
        if mqd != -1 {
            return Ok((mqd, false));
        }
        let err = io::Error::last_os_error();
        // Unlinked between the two calls: try creating again.
        if err.raw_os_error() != Some(libc::ENOENT) {
            return Err(err.into());
        }
    }

    Err(io::Error::other("queue name kept disappearing while opening").into())
}

fn get_attr(mqd: libc::mqd_t) -> Result<libc::mq_attr> {
    // SAFETY: mq_attr is plain old data; all-zero is a valid value.
    let mut attr: libc::mq_attr = unsafe { std::mem::zeroed() };
    // SAFETY: `mqd` is open and `attr` is a valid out-pointer.
    if unsafe { libc::mq_getattr(mqd, &mut attr) } == -1 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(attr)
}

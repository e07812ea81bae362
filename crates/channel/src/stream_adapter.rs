// SPDX-License-Identifier: Apache-2.0

//! Host byte-stream bridges: `as_writable`/`as_readable` adapt a
//! `Channel<Vec<u8>>` to [`futures_io::AsyncWrite`]/[`futures_io::AsyncRead`].
//!
//! Behavior is undefined with more than one writable or more than one readable
//! adapter on the same channel — it has no ordering guarantee for competing
//! adapters contending over the same `take`/`put`. For multi-consumer fan-out, tap
//! the channel instead and give each adapter its own tap.

use crate::base::Channel;
use crate::item::ChannelItem;
use futures_io::{AsyncRead, AsyncWrite};
use std::cell::RefCell;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// Adapts a `Channel<Vec<u8>>` into an [`AsyncWrite`] sink: each `poll_write` call
/// `put`s its chunk and completes once the channel acks it.
pub struct WritableAdapter {
    channel: Channel<Vec<u8>>,
    pending: RefCell<Option<PendingWrite>>,
}

struct PendingWrite {
    len: usize,
    outcome: std::rc::Rc<RefCell<Option<io::Result<()>>>>,
    waker: std::rc::Rc<RefCell<Option<Waker>>>,
}

impl WritableAdapter {
    /// Wraps `channel` as a writable byte sink.
    pub fn new(channel: Channel<Vec<u8>>) -> Self {
        Self {
            channel,
            pending: RefCell::new(None),
        }
    }
}

impl AsyncWrite for WritableAdapter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();

        if let Some(pending) = this.pending.borrow().as_ref() {
            match pending.outcome.borrow_mut().take() {
                Some(Ok(())) => {
                    let len = pending.len;
                    this.pending.replace(None);
                    return Poll::Ready(Ok(len));
                }
                Some(Err(e)) => {
                    this.pending.replace(None);
                    return Poll::Ready(Err(e));
                }
                None => {
                    *pending.waker.borrow_mut() = Some(cx.waker().clone());
                    return Poll::Pending;
                }
            }
        }

        let outcome = std::rc::Rc::new(RefCell::new(None));
        let waker = std::rc::Rc::new(RefCell::new(Some(cx.waker().clone())));
        let outcome_for_ack = outcome.clone();
        let waker_for_ack = waker.clone();
        this.channel.put_value(
            buf.to_vec(),
            Box::new(move |res| {
                *outcome_for_ack.borrow_mut() = Some(match res {
                    Ok(ChannelItem::Value(_)) => Ok(()),
                    Ok(ChannelItem::End) => {
                        Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel ended"))
                    }
                    Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
                });
                if let Some(w) = waker_for_ack.borrow_mut().take() {
                    w.wake();
                }
            }),
        );
        this.pending.replace(Some(PendingWrite {
            len: buf.len(),
            outcome,
            waker,
        }));
        Poll::Pending
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.channel.put_end(Box::new(|_| {}));
        Poll::Ready(Ok(()))
    }
}

/// Adapts a `Channel<Vec<u8>>` into an [`AsyncRead`] source: each `poll_read` call
/// pulls the next chunk via `take` and copies as much of it as fits into the
/// caller's buffer, parking the remainder for the next call.
pub struct ReadableAdapter {
    channel: Channel<Vec<u8>>,
    state: RefCell<ReadState>,
}

enum ReadState {
    Idle,
    Pending(std::rc::Rc<RefCell<Option<io::Result<Option<Vec<u8>>>>>>, std::rc::Rc<RefCell<Option<Waker>>>),
    Buffered(Vec<u8>, usize),
    Eof,
}

impl ReadableAdapter {
    /// Wraps `channel` as a readable byte source.
    pub fn new(channel: Channel<Vec<u8>>) -> Self {
        Self {
            channel,
            state: RefCell::new(ReadState::Idle),
        }
    }
}

impl AsyncRead for ReadableAdapter {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            let mut state = this.state.borrow_mut();
            match &mut *state {
                ReadState::Eof => return Poll::Ready(Ok(0)),
                ReadState::Buffered(chunk, offset) => {
                    let remaining = &chunk[*offset..];
                    let n = remaining.len().min(buf.len());
                    buf[..n].copy_from_slice(&remaining[..n]);
                    *offset += n;
                    if *offset == chunk.len() {
                        *state = ReadState::Idle;
                    }
                    return Poll::Ready(Ok(n));
                }
                ReadState::Pending(outcome, waker) => {
                    let result = outcome.borrow_mut().take();
                    match result {
                        Some(Ok(Some(chunk))) => {
                            drop(state);
                            *this.state.borrow_mut() = ReadState::Buffered(chunk, 0);
                            continue;
                        }
                        Some(Ok(None)) => {
                            *state = ReadState::Eof;
                            return Poll::Ready(Ok(0));
                        }
                        Some(Err(e)) => {
                            *state = ReadState::Idle;
                            return Poll::Ready(Err(e));
                        }
                        None => {
                            *waker.borrow_mut() = Some(cx.waker().clone());
                            return Poll::Pending;
                        }
                    }
                }
                ReadState::Idle => {
                    let outcome = std::rc::Rc::new(RefCell::new(None));
                    let waker = std::rc::Rc::new(RefCell::new(Some(cx.waker().clone())));
                    let outcome_for_take = outcome.clone();
                    let waker_for_take = waker.clone();
                    this.channel.take(Box::new(move |res| {
                        *outcome_for_take.borrow_mut() = Some(match res {
                            Ok(ChannelItem::Value(chunk)) => Ok(Some(chunk)),
                            Ok(ChannelItem::End) => Ok(None),
                            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
                        });
                        if let Some(w) = waker_for_take.borrow_mut().take() {
                            w.wake();
                        }
                    }));
                    *state = ReadState::Pending(outcome, waker);
                }
            }
        }
    }
}

//! Output staging between a running command and the chat writer.
//!
//! Subprocess pipes write arbitrary byte chunks at arbitrary times; posting
//! each chunk as its own chat message would flood the channel, and a sixel
//! image split across two writes must still become one picture. The
//! [`OutputWriter`] therefore buffers up to [`FLUSH_THRESHOLD`] bytes and
//! flushes on a [`IDLE_FLUSH`] idle timer, while the inner [`RawWriter`]
//! classifies the stream into text and DCS sixel sequences with a byte
//! state machine that survives any write-boundary split.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bosun_types::{ReplyRef, ReplyStyle};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::queue::CommandOutput;
use crate::sixel;

/// Outer buffer capacity; reaching it drains into the state machine.
pub const FLUSH_THRESHOLD: usize = 2048;
/// Idle time after the last write before a self-flush.
pub const IDLE_FLUSH: Duration = Duration::from_secs(3);

const ESC: u8 = 0x1b;

/// Thread-safe byte sink in front of the output queue.
///
/// Clones share the same buffer and state machine; the executor hands one
/// clone to the pump task and keeps one for the final flush.
#[derive(Clone)]
pub struct OutputWriter {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
}

struct State {
    buf: Vec<u8>,
    raw: RawWriter,
    /// Idle-flush task for the most recent write.
    timer: Option<JoinHandle<()>>,
    /// Incremented per write; lets a stale timer detect it was superseded.
    generation: u64,
}

impl OutputWriter {
    /// Writer for the stdout polarity.
    pub fn stdout(
        tx: mpsc::Sender<CommandOutput>,
        reply: ReplyRef,
        style: Option<Arc<ReplyStyle>>,
    ) -> Self {
        Self::new(tx, reply, style, false)
    }

    /// Writer for the stderr polarity.
    pub fn stderr(
        tx: mpsc::Sender<CommandOutput>,
        reply: ReplyRef,
        style: Option<Arc<ReplyStyle>>,
    ) -> Self {
        Self::new(tx, reply, style, true)
    }

    fn new(
        tx: mpsc::Sender<CommandOutput>,
        reply: ReplyRef,
        style: Option<Arc<ReplyStyle>>,
        is_err_out: bool,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    buf: Vec::with_capacity(FLUSH_THRESHOLD),
                    raw: RawWriter::new(tx, reply, style, is_err_out),
                    timer: None,
                    generation: 0,
                }),
            }),
        }
    }

    /// Append bytes, draining to the state machine past the size threshold,
    /// and re-arm the idle timer.
    pub async fn write(&self, data: &[u8]) {
        let mut st = self.shared.state.lock().await;
        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
        st.buf.extend_from_slice(data);
        if st.buf.len() >= FLUSH_THRESHOLD {
            let chunk = std::mem::take(&mut st.buf);
            st.raw.write(&chunk).await;
        }

        st.generation += 1;
        let generation = st.generation;
        let weak = Arc::downgrade(&self.shared);
        st.timer = Some(tokio::spawn(idle_flush(weak, generation)));
    }

    /// Drain the buffer and resolve the state machine's terminal state.
    ///
    /// Stops the idle timer first so it cannot race the drain. Flushing an
    /// already-flushed writer is a no-op.
    pub async fn flush(&self) {
        let mut st = self.shared.state.lock().await;
        if let Some(timer) = st.timer.take() {
            timer.abort();
        }
        st.flush().await;
    }
}

async fn idle_flush(weak: Weak<Shared>, generation: u64) {
    tokio::time::sleep(IDLE_FLUSH).await;
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut st = shared.state.lock().await;
    if st.generation == generation {
        st.flush().await;
    }
}

impl State {
    async fn flush(&mut self) {
        let chunk = std::mem::take(&mut self.buf);
        if !chunk.is_empty() {
            self.raw.write(&chunk).await;
        }
        self.raw.flush().await;
    }
}

/// DCS sixel scanning states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SixelState {
    /// Plain text.
    Text,
    /// `ESC` received; the next byte decides.
    EscSeen,
    /// Inside `ESC P`, parameters before the `q` that confirms sixel.
    DcsHead,
    /// `ESC` inside the DCS head; `\` would terminate a non-sixel DCS.
    DcsHeadEsc,
    /// Sixel payload after `q`.
    DcsData,
    /// `ESC` inside sixel payload; `\` completes the image.
    DcsDataEsc,
}

enum Emission {
    Text(Vec<u8>),
    Sixel(Vec<u8>),
}

/// The byte classifier feeding the output queue.
struct RawWriter {
    tx: mpsc::Sender<CommandOutput>,
    reply: ReplyRef,
    style: Option<Arc<ReplyStyle>>,
    is_err_out: bool,
    state: SixelState,
    text: Vec<u8>,
    sixel: Vec<u8>,
}

impl RawWriter {
    fn new(
        tx: mpsc::Sender<CommandOutput>,
        reply: ReplyRef,
        style: Option<Arc<ReplyStyle>>,
        is_err_out: bool,
    ) -> Self {
        Self {
            tx,
            reply,
            style,
            is_err_out,
            state: SixelState::Text,
            text: Vec::new(),
            sixel: Vec::new(),
        }
    }

    async fn write(&mut self, data: &[u8]) {
        let mut emissions = Vec::new();
        for &b in data {
            self.feed(b, &mut emissions);
        }
        // Pending text goes out at write boundaries, but only while no
        // escape sequence is in flight.
        if self.state == SixelState::Text && !self.text.is_empty() {
            emissions.push(Emission::Text(std::mem::take(&mut self.text)));
        }
        self.emit(emissions).await;
    }

    /// Resolve the terminal state: a lone `ESC` becomes literal text, a
    /// partial DCS is discarded.
    async fn flush(&mut self) {
        match self.state {
            SixelState::Text => {}
            SixelState::EscSeen => self.text.push(ESC),
            _ => self.sixel.clear(),
        }
        self.state = SixelState::Text;
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            self.emit(vec![Emission::Text(text)]).await;
        }
    }

    fn feed(&mut self, b: u8, emissions: &mut Vec<Emission>) {
        match self.state {
            SixelState::Text => {
                if b == ESC {
                    if !self.text.is_empty() {
                        emissions.push(Emission::Text(std::mem::take(&mut self.text)));
                    }
                    self.state = SixelState::EscSeen;
                } else {
                    self.text.push(b);
                }
            }
            SixelState::EscSeen => {
                if b == b'P' {
                    self.sixel.clear();
                    self.sixel.extend_from_slice(&[ESC, b'P']);
                    self.state = SixelState::DcsHead;
                } else if b == ESC {
                    // The previous ESC was literal; this one is pending.
                    self.text.push(ESC);
                } else {
                    self.text.push(ESC);
                    self.text.push(b);
                    self.state = SixelState::Text;
                }
            }
            SixelState::DcsHead => {
                self.sixel.push(b);
                if b == b'q' {
                    self.state = SixelState::DcsData;
                } else if b == ESC {
                    self.state = SixelState::DcsHeadEsc;
                }
            }
            SixelState::DcsHeadEsc => {
                if b == b'\\' {
                    // A control string that never committed to sixel.
                    self.sixel.clear();
                    self.state = SixelState::Text;
                } else if b == ESC {
                    self.sixel.push(b);
                } else {
                    self.sixel.push(b);
                    self.state = SixelState::DcsHead;
                }
            }
            SixelState::DcsData => {
                self.sixel.push(b);
                if b == ESC {
                    self.state = SixelState::DcsDataEsc;
                }
            }
            SixelState::DcsDataEsc => {
                self.sixel.push(b);
                if b == b'\\' {
                    emissions.push(Emission::Sixel(std::mem::take(&mut self.sixel)));
                    self.state = SixelState::Text;
                } else if b != ESC {
                    self.state = SixelState::DcsData;
                }
            }
        }
    }

    async fn emit(&self, emissions: Vec<Emission>) {
        for emission in emissions {
            match emission {
                Emission::Text(bytes) => {
                    if bytes.is_empty() {
                        continue;
                    }
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let out = CommandOutput::text(
                        self.reply.clone(),
                        self.style.clone(),
                        text,
                        self.is_err_out,
                    );
                    let _ = self.tx.send(out).await;
                }
                Emission::Sixel(bytes) => match sixel::sixel_to_png(&bytes) {
                    Ok(png) => {
                        let out = CommandOutput::image(
                            self.reply.clone(),
                            self.style.clone(),
                            png,
                            self.is_err_out,
                        );
                        let _ = self.tx.send(out).await;
                    }
                    Err(e) => warn!(error = %e, "sixel to PNG conversion failed"),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED_RECT: &[u8] = b"\x1bPq\"1;1;4;6#1;2;100;0;0#1~~~~\x1b\\";

    fn reply() -> ReplyRef {
        ReplyRef::Message {
            channel: "C1".into(),
            ts: "1.2".into(),
        }
    }

    fn writer(cap: usize) -> (OutputWriter, mpsc::Receiver<CommandOutput>) {
        let (tx, rx) = mpsc::channel(cap);
        (OutputWriter::stdout(tx, reply(), None), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<CommandOutput>) -> Vec<CommandOutput> {
        let mut out = Vec::new();
        while let Ok(o) = rx.try_recv() {
            out.push(o);
        }
        out
    }

    async fn collect(writes: &[&[u8]]) -> Vec<CommandOutput> {
        let (w, mut rx) = writer(100);
        for chunk in writes {
            w.write(chunk).await;
        }
        w.flush().await;
        drain(&mut rx)
    }

    fn text_concat(outs: &[CommandOutput]) -> String {
        outs.iter()
            .filter_map(|o| o.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    #[tokio::test]
    async fn pure_text_is_emitted_once_flushed() {
        let outs = collect(&[b"hello world"]).await;
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].text.as_deref(), Some("hello world"));
        assert!(outs[0].image.is_none());
    }

    #[tokio::test]
    async fn large_writes_drain_before_flush() {
        let (w, mut rx) = writer(100);
        let big = vec![b'a'; FLUSH_THRESHOLD + 10];
        w.write(&big).await;
        // Threshold crossing drains without an explicit flush.
        let outs = drain(&mut rx);
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].text.as_deref().map(str::len), Some(big.len()));
        w.flush().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn sixel_only_becomes_one_png() {
        let outs = collect(&[RED_RECT]).await;
        let images: Vec<_> = outs.iter().filter(|o| o.image.is_some()).collect();
        assert_eq!(images.len(), 1);
        assert!(images[0]
            .image
            .as_deref()
            .unwrap()
            .starts_with(b"\x89PNG"));
        assert!(outs.iter().all(|o| o.text.is_none()));
    }

    #[tokio::test]
    async fn text_around_sixel_is_preserved() {
        let mut data = b"before\n".to_vec();
        data.extend_from_slice(RED_RECT);
        data.extend_from_slice(b"\nafter");
        let outs = collect(&[&data]).await;

        let images: Vec<_> = outs.iter().filter(|o| o.image.is_some()).collect();
        assert_eq!(images.len(), 1);
        let text = text_concat(&outs);
        assert!(text.contains("before\n"));
        assert!(text.contains("\nafter"));
    }

    #[tokio::test]
    async fn sixel_split_across_writes_still_decodes() {
        let (head, tail) = RED_RECT.split_at(9);
        let outs = collect(&[head, tail]).await;
        let images: Vec<_> = outs.iter().filter(|o| o.image.is_some()).collect();
        assert_eq!(images.len(), 1);
    }

    #[tokio::test]
    async fn split_at_every_boundary_yields_exactly_one_image() {
        for split in 1..RED_RECT.len() {
            let (head, tail) = RED_RECT.split_at(split);
            let outs = collect(&[head, tail]).await;
            let images = outs.iter().filter(|o| o.image.is_some()).count();
            assert_eq!(images, 1, "split at {split}");
        }
    }

    #[tokio::test]
    async fn non_sixel_dcs_is_discarded() {
        let outs = collect(&[b"\x1bPfoo\x1b\\"]).await;
        assert!(outs.is_empty());
    }

    #[tokio::test]
    async fn literal_escape_passes_through_as_text() {
        // ESC followed by a plain byte is not a control string.
        let outs = collect(&[b"a\x1bZb"]).await;
        assert_eq!(text_concat(&outs), "a\u{1b}Zb");
    }

    #[tokio::test]
    async fn double_escape_keeps_first_as_text() {
        let outs = collect(&[b"\x1b\x1bZ"]).await;
        assert_eq!(text_concat(&outs), "\u{1b}\u{1b}Z");
    }

    #[tokio::test]
    async fn trailing_escape_is_promoted_on_flush() {
        let outs = collect(&[b"tail\x1b"]).await;
        assert_eq!(text_concat(&outs), "tail\u{1b}");
    }

    #[tokio::test]
    async fn trailing_partial_dcs_is_discarded_on_flush() {
        let mut data = b"text".to_vec();
        data.extend_from_slice(&RED_RECT[..RED_RECT.len() - 2]);
        let outs = collect(&[&data]).await;
        assert_eq!(text_concat(&outs), "text");
        assert!(outs.iter().all(|o| o.image.is_none()));
    }

    #[tokio::test]
    async fn flush_is_idempotent() {
        let (w, mut rx) = writer(100);
        w.write(b"once").await;
        w.flush().await;
        w.flush().await;
        let outs = drain(&mut rx);
        assert_eq!(outs.len(), 1);
    }

    #[tokio::test]
    async fn stderr_polarity_is_tagged() {
        let (tx, mut rx) = mpsc::channel(10);
        let w = OutputWriter::stderr(tx, reply(), None);
        w.write(b"oops").await;
        w.flush().await;
        let outs = drain(&mut rx);
        assert!(outs[0].is_err_out);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_flushes_without_explicit_flush() {
        let (w, mut rx) = writer(100);
        w.write(b"slow output").await;
        tokio::time::sleep(IDLE_FLUSH + Duration::from_millis(100)).await;
        // Yield so the timer task runs under the paused clock.
        tokio::task::yield_now().await;
        let outs = drain(&mut rx);
        assert_eq!(outs.len(), 1);
        assert_eq!(outs[0].text.as_deref(), Some("slow output"));
    }
}

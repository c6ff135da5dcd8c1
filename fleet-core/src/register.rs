use std::io::Write;
use std::sync::{Arc, Mutex};

use fleet_value::Value;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One simulation event: an ordered record of typed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub values: Vec<Value>,
}

impl Trace {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl<V: Into<Value>> FromIterator<V> for Trace {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// Sink for simulation traces. Recording never blocks the caller.
pub trait Register: Send + Sync {
    fn record(&self, trace: Trace);
}

/// Forwards traces into an unbounded channel, e.g. towards an RPC stream.
#[derive(Debug, Clone)]
pub struct ChannelRegister {
    tx: mpsc::UnboundedSender<Trace>,
}

impl ChannelRegister {
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Trace>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Register for ChannelRegister {
    fn record(&self, trace: Trace) {
        if self.tx.send(trace).is_err() {
            tracing::debug!("trace receiver closed, dropping trace");
        }
    }
}

/// Keeps every trace in memory.
#[derive(Debug, Default)]
pub struct MemoryRegister {
    traces: Mutex<Vec<Trace>>,
}

impl MemoryRegister {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn traces(&self) -> Vec<Trace> {
        self.traces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.traces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Register for MemoryRegister {
    fn record(&self, trace: Trace) {
        self.traces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(trace);
    }
}

/// Writes one JSON document per trace (NDJSON).
pub struct JsonLinesRegister {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesRegister {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }
}

impl Register for JsonLinesRegister {
    fn record(&self, trace: Trace) {
        let mut out = self
            .out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut line = match serde_json::to_vec(&trace) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode trace");
                return;
            }
        };
        line.push(b'\n');
        if let Err(err) = out.write_all(&line).and_then(|()| out.flush()) {
            tracing::warn!(error = %err, "failed to write trace");
        }
    }
}

/// Fans each trace out to several registers.
#[derive(Default)]
pub struct Tee(Vec<Arc<dyn Register>>);

impl Tee {
    #[must_use]
    pub fn new(registers: Vec<Arc<dyn Register>>) -> Self {
        Self(registers)
    }
}

impl Register for Tee {
    fn record(&self, trace: Trace) {
        if let Some((last, rest)) = self.0.split_last() {
            for r in rest {
                r.record(trace.clone());
            }
            last.record(trace);
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn json_lines_writes_one_trace_per_line() {
        let buf = SharedBuf::default();
        let reg = JsonLinesRegister::new(buf.clone());
        reg.record(Trace::from_iter(["a", "b"]));
        reg.record(Trace::new(vec![Value::from(1_i64), Value::from(true)]));

        let raw = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: Trace = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.values, vec![Value::I64(1), Value::Bool(true)]);
    }

    #[tokio::test]
    async fn channel_register_forwards_in_order() {
        let (reg, mut rx) = ChannelRegister::new();
        reg.record(Trace::from_iter([1_i64]));
        reg.record(Trace::from_iter([2_i64]));
        drop(reg);

        assert_eq!(rx.recv().await.unwrap().values, vec![Value::I64(1)]);
        assert_eq!(rx.recv().await.unwrap().values, vec![Value::I64(2)]);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn tee_reaches_every_register() {
        let a = Arc::new(MemoryRegister::new());
        let b = Arc::new(MemoryRegister::new());
        let tee = Tee::new(vec![a.clone() as Arc<dyn Register>, b.clone()]);
        tee.record(Trace::from_iter(["x"]));
        assert_eq!(a.len(), 1);
        assert_eq!(b.traces(), a.traces());
    }
}

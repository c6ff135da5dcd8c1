//! Synthetic argument sources for benchmarks.
//!
//! A [`Param`] owns a pool of values that is regenerated on [`Param::reset`];
//! [`Param::next`] draws one pool member uniformly at random, with replacement.

use bytes::Bytes;
use fleet_value::Value;
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::{Error, Result};

pub trait Param: Send + Sync {
    /// Regenerates the pool. Composite sources reset their inner source first.
    fn reset(&mut self) -> Result<()>;

    /// Returns one value produced by the most recent `reset`.
    fn next(&self) -> Result<Value>;
}

#[derive(Debug, Default)]
struct Pool(Option<Vec<Value>>);

impl Pool {
    fn fill(&mut self, values: Vec<Value>) {
        self.0 = Some(values);
    }

    fn values(&self) -> Result<&[Value]> {
        self.0.as_deref().ok_or(Error::ParamNotReset)
    }

    fn draw(&self) -> Result<Value> {
        let values = self.values()?;
        if values.is_empty() {
            return Err(Error::EmptyPool);
        }
        let idx = rand::thread_rng().gen_range(0..values.len());
        Ok(values[idx].clone())
    }
}

fn alphanumeric(length: usize) -> Vec<u8> {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .collect()
}

/// `count` random alphanumeric strings of exactly `length` characters.
#[derive(Debug)]
pub struct RandomString {
    count: usize,
    length: usize,
    pool: Pool,
}

impl RandomString {
    #[must_use]
    pub fn new(count: usize, length: usize) -> Self {
        Self {
            count,
            length,
            pool: Pool::default(),
        }
    }
}

impl Param for RandomString {
    fn reset(&mut self) -> Result<()> {
        let values = (0..self.count)
            .map(|_| {
                let raw = alphanumeric(self.length);
                Value::from(String::from_utf8_lossy(&raw).into_owned())
            })
            .collect();
        self.pool.fill(values);
        Ok(())
    }

    fn next(&self) -> Result<Value> {
        self.pool.draw()
    }
}

/// `count` random byte strings of exactly `length` bytes, drawn from the alphanumeric set.
#[derive(Debug)]
pub struct RandomBytes {
    count: usize,
    length: usize,
    pool: Pool,
}

impl RandomBytes {
    #[must_use]
    pub fn new(count: usize, length: usize) -> Self {
        Self {
            count,
            length,
            pool: Pool::default(),
        }
    }
}

impl Param for RandomBytes {
    fn reset(&mut self) -> Result<()> {
        let values = (0..self.count)
            .map(|_| Value::Bytes(Bytes::from(alphanumeric(self.length))))
            .collect();
        self.pool.fill(values);
        Ok(())
    }

    fn next(&self) -> Result<Value> {
        self.pool.draw()
    }
}

/// Materializes `size` values of an inner source; `next` returns the whole set as an array.
pub struct SetOf {
    inner: Box<dyn Param>,
    size: usize,
    set: Option<Vec<Value>>,
}

impl SetOf {
    pub fn new(inner: impl Param + 'static, size: usize) -> Self {
        Self {
            inner: Box::new(inner),
            size,
            set: None,
        }
    }
}

impl Param for SetOf {
    fn reset(&mut self) -> Result<()> {
        self.inner.reset()?;
        let set = (0..self.size)
            .map(|_| self.inner.next())
            .collect::<Result<Vec<_>>>()?;
        self.set = Some(set);
        Ok(())
    }

    fn next(&self) -> Result<Value> {
        self.set
            .clone()
            .map(Value::Array)
            .ok_or(Error::ParamNotReset)
    }
}

/// Draws single elements from the array produced by an inner set source.
pub struct RandomChoice {
    set: Box<dyn Param>,
    pool: Pool,
}

impl RandomChoice {
    pub fn new(set: impl Param + 'static) -> Self {
        Self {
            set: Box::new(set),
            pool: Pool::default(),
        }
    }
}

impl Param for RandomChoice {
    fn reset(&mut self) -> Result<()> {
        self.set.reset()?;
        match self.set.next()? {
            Value::Array(values) => {
                self.pool.fill(values);
                Ok(())
            }
            other => Err(Error::invalid_config(format!(
                "random choice needs a set source, got `{other}`"
            ))),
        }
    }

    fn next(&self) -> Result<Value> {
        self.pool.draw()
    }
}

/// Ordered group of sources producing one argument tuple per call.
#[derive(Default)]
pub struct Params(Vec<Box<dyn Param>>);

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, param: impl Param + 'static) -> Self {
        self.0.push(Box::new(param));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.0.iter_mut().try_for_each(|p| p.reset())
    }

    pub fn next_args(&self) -> Result<Vec<Value>> {
        self.0.iter().map(|p| p.next()).collect()
    }

    /// Pre-generates `count` argument tuples.
    pub fn generate(&self, count: usize) -> Result<Vec<Vec<Value>>> {
        (0..count).map(|_| self.next_args()).collect()
    }
}

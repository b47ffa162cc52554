// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Interceptors run before the listener sees a message.
//!

use crate::{Error, Message};

use async_trait::async_trait;

use std::sync::Arc;

/// Pre-processing hook chained before the listener invocation.
///
/// A failed interception counts as a failed processing of the message: the listener is not
/// invoked and the message goes through error handling.
#[async_trait]
pub trait AsyncMessageInterceptor<T>: Send + Sync + 'static {
    async fn intercept(&self, message: &Message<T>) -> Result<(), Error>;
}

/// Runs several interceptors in order, stopping at the first failure.
pub struct CompositeInterceptor<T> {
    interceptors: Vec<Arc<dyn AsyncMessageInterceptor<T>>>,
}

impl<T> CompositeInterceptor<T> {
    pub fn new(interceptors: Vec<Arc<dyn AsyncMessageInterceptor<T>>>) -> Self {
        Self { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

#[async_trait]
impl<T> AsyncMessageInterceptor<T> for CompositeInterceptor<T>
where
    T: Send + Sync + 'static,
{
    async fn intercept(&self, message: &Message<T>) -> Result<(), Error> {
        for interceptor in &self.interceptors {
            interceptor.intercept(message).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use std::sync::Mutex;

    struct Recording {
        name: &'static str,
        fail: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl AsyncMessageInterceptor<u32> for Recording {
        async fn intercept(&self, _message: &Message<u32>) -> Result<(), Error> {
            self.calls.lock().unwrap().push(self.name);
            if self.fail {
                Err(Error::Interceptor(self.name.to_owned()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_composite_stops_at_first_failure() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let composite = CompositeInterceptor::new(vec![
            Arc::new(Recording { name: "first", fail: false, calls: calls.clone() }),
            Arc::new(Recording { name: "second", fail: true, calls: calls.clone() }),
            Arc::new(Recording { name: "third", fail: false, calls: calls.clone() }),
        ]);
        assert_eq!(composite.len(), 3);

        let result = composite.intercept(&Message::new(7)).await;
        assert_eq!(result, Err(Error::Interceptor("second".to_owned())));
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
    }
}

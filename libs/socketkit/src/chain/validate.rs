use std::sync::Arc;

use futures::FutureExt;

use super::{MethodWrapper, WrapTarget};
use crate::error::SocketError;
use crate::invocation::{Invocation, MethodHandler};
use crate::metadata::MethodArgMetadata;
use crate::validation::{check_value, PayloadValidator};

/// Rejects invocations whose payload does not match the declared data parameters.
///
/// Runs only when validation is enabled globally, the method does not skip it and the
/// listener that fired asked for it.
pub(crate) struct DataValidation {
    enabled: bool,
    validator: Arc<dyn PayloadValidator>,
}

impl DataValidation {
    pub fn new(enabled: bool, validator: Arc<dyn PayloadValidator>) -> Self {
        Self { enabled, validator }
    }
}

impl MethodWrapper for DataValidation {
    fn stage(&self) -> &'static str {
        "data_validation"
    }

    fn wrap(
        &self,
        target: &WrapTarget<'_>,
        inner: MethodHandler,
    ) -> Result<MethodHandler, SocketError> {
        let method = target.method.clone();
        if !self.enabled || method.skip_validation || !method.has_data_args() {
            return Ok(inner);
        }
        let validator = self.validator.clone();

        Ok(Arc::new(move |call: Invocation| {
            let inner = inner.clone();
            let method = method.clone();
            let validator = validator.clone();
            async move {
                if call.listener.as_ref().is_some_and(|l| l.data_check) {
                    for arg in &method.args {
                        let MethodArgMetadata::Data {
                            index,
                            data_index,
                            param_type,
                        } = arg
                        else {
                            continue;
                        };
                        let slot = call.args.get(*data_index);
                        if let Err(reason) =
                            check_value(slot, param_type, validator.as_ref()).await
                        {
                            tracing::debug!(
                                controller = call.controller,
                                method = method.name,
                                event = %call.event,
                                parameter = index,
                                %reason,
                                "Incoming data rejected"
                            );
                            return Err(SocketError::incoming_data(
                                call.event.clone(),
                                format!("parameter {index} (payload #{data_index}): {reason}"),
                            ));
                        }
                    }
                }
                inner(call).await
            }
            .boxed()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::test_support::{controller, invocation, recording, wrap};
    use crate::invocation::Reply;
    use crate::metadata::MethodMetadata;
    use crate::validation::{ParamType, SchemaValidator};
    use serde_json::json;

    fn method(data_index: usize, param_type: ParamType, skip: bool) -> Arc<MethodMetadata> {
        let mut method = MethodMetadata::new("probe");
        method.args = vec![MethodArgMetadata::Data {
            index: 0,
            data_index,
            param_type,
        }];
        method.skip_validation = skip;
        Arc::new(method)
    }

    fn stage(enabled: bool) -> DataValidation {
        DataValidation::new(enabled, Arc::new(SchemaValidator))
    }

    #[tokio::test]
    async fn out_of_range_payload_never_reaches_the_handler() {
        let method = method(2, ParamType::Any, false);
        let (inner, calls) = recording(Reply::None);
        let handler = wrap(&stage(true), &controller(), &method, inner);

        let err = handler(invocation(&method, "message", vec![json!("only one")], None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "incoming_data");
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn matching_payload_passes() {
        let method = method(0, ParamType::Number, false);
        let (inner, calls) = recording(Reply::None);
        let handler = wrap(&stage(true), &controller(), &method, inner);

        handler(invocation(&method, "message", vec![json!(42)], None))
            .await
            .unwrap();
        assert_eq!(calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn wrong_primitive_type_is_rejected() {
        let method = method(0, ParamType::Boolean, false);
        let (inner, _) = recording(Reply::None);
        let handler = wrap(&stage(true), &controller(), &method, inner);

        let err = handler(invocation(&method, "message", vec![json!("yes")], None))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected boolean"), "{err}");
    }

    #[tokio::test]
    async fn disabled_skipped_or_unchecked_listeners_do_not_validate() {
        // globally disabled
        let m = method(5, ParamType::String, false);
        let (inner, calls) = recording(Reply::None);
        let handler = wrap(&stage(false), &controller(), &m, inner);
        handler(invocation(&m, "e", vec![], None)).await.unwrap();
        assert_eq!(calls.lock().len(), 1);

        // method opted out
        let m = method(5, ParamType::String, true);
        let (inner, calls) = recording(Reply::None);
        let handler = wrap(&stage(true), &controller(), &m, inner);
        handler(invocation(&m, "e", vec![], None)).await.unwrap();
        assert_eq!(calls.lock().len(), 1);

        // listener without data check
        let m = method(5, ParamType::String, false);
        let (inner, calls) = recording(Reply::None);
        let handler = wrap(&stage(true), &controller(), &m, inner);
        let mut call = invocation(&m, "e", vec![], None);
        call.listener = call.listener.map(|l| l.with_data_check(false));
        handler(call).await.unwrap();
        assert_eq!(calls.lock().len(), 1);
    }
}

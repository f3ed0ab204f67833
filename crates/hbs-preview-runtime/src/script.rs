//! Recipe callables backed by functions living in a script realm.

use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::oneshot;

use hbs_preview_core::{Error, HelperCall, HelperOutcome, ProcessingContext, TemplateHelper, TextHook};

use crate::realm::{Call, RealmHandle};

/// A template helper defined by the companion module.
///
/// Calls block the calling thread until the realm answers, so they must
/// not run on an async worker; the render pipeline calls helpers from the
/// blocking pool.
pub(crate) struct ScriptHelper {
    pub realm: Arc<RealmHandle>,
    pub id: u32,
}

impl TemplateHelper for ScriptHelper {
    fn call(&self, call: &HelperCall) -> Result<HelperOutcome, String> {
        let (reply, answer) = oneshot::channel();
        self.realm.send(Call::Helper {
            id: self.id,
            call: call.clone(),
            reply,
        })?;
        answer
            .blocking_recv()
            .map_err(|_| Error::RealmUnavailable.to_string())?
    }
}

/// A `preprocess` / `postprocess` function defined by the companion module.
pub(crate) struct ScriptHook {
    pub realm: Arc<RealmHandle>,
    pub id: u32,
    pub name: &'static str,
}

impl TextHook for ScriptHook {
    fn apply<'a>(&'a self, text: String, context: &'a ProcessingContext) -> BoxFuture<'a, Result<String, String>> {
        let (reply, answer) = oneshot::channel();
        let sent = self.realm.send(Call::Hook {
            id: self.id,
            name: self.name,
            text,
            context: context.to_json(),
            reply,
        });
        Box::pin(async move {
            sent?;
            answer.await.map_err(|_| Error::RealmUnavailable.to_string())?
        })
    }
}

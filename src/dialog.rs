//! User interface tools answering DIALOG templates.

use crate::error::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// What to ask the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInterfaceDialogOptions {
    /// Title of the asking template.
    pub prompt_title: String,
    /// Rendered template content.
    pub prompt_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    /// Higher asks first when several dialogs are pending.
    #[serde(default)]
    pub priority: i32,
}

/// Asks a human for a template result.
#[async_trait]
pub trait UserInterfaceTools: Send + Sync {
    async fn prompt_dialog(&self, options: UserInterfaceDialogOptions) -> Result<String>;
}

type DialogCallback =
    Box<dyn Fn(UserInterfaceDialogOptions) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// [`UserInterfaceTools`] backed by an async closure.
///
/// # Example
///
/// ```
/// use prompt_pipeline::dialog::CallbackInterfaceTools;
/// use futures::FutureExt;
///
/// let ui = CallbackInterfaceTools::new(|options| {
///     async move { Ok(options.default_value.unwrap_or_default()) }.boxed()
/// });
/// ```
pub struct CallbackInterfaceTools {
    callback: DialogCallback,
}

impl CallbackInterfaceTools {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(UserInterfaceDialogOptions) -> BoxFuture<'static, Result<String>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl UserInterfaceTools for CallbackInterfaceTools {
    async fn prompt_dialog(&self, options: UserInterfaceDialogOptions) -> Result<String> {
        (self.callback)(options).await
    }
}

impl std::fmt::Debug for CallbackInterfaceTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackInterfaceTools").finish_non_exhaustive()
    }
}

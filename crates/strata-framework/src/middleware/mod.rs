//! Supplementary middleware.
//!
//! Small layers that round out a pipeline. Each wraps exactly one downstream
//! application and forwards the same [`Env`](strata_core::Env).
//!
//! | layer                   | effect                                              |
//! |-------------------------|-----------------------------------------------------|
//! | [`CatchLayer`]          | downstream `Err` becomes a reported `500`           |
//! | [`LoggerLayer`]         | one access-log event per request                    |
//! | [`ContentLengthLayer`]  | `Content-Length` for fully materialized bodies      |
//! | [`ContentTypeLayer`]    | default `Content-Type` when none is set             |
//! | [`HeadLayer`]           | empty body for `HEAD` requests                      |
//! | [`MethodOverrideLayer`] | `POST` rewritten from header or `_method` parameter |

mod catch;
mod content_length;
mod content_type;
mod head;
mod logger;
mod method_override;

pub use catch::{Catch, CatchLayer};
pub use content_length::{ContentLength, ContentLengthLayer};
pub use content_type::{ContentType, ContentTypeLayer};
pub use head::{Head, HeadLayer};
pub use logger::{Logger, LoggerLayer};
pub use method_override::{METHOD_OVERRIDE_HEADER, MethodOverride, MethodOverrideLayer};

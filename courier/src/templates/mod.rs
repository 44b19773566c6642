//! Channel templates and language resolution.

pub mod email;
mod resolver;

pub use email::{EmailFormatter, EmailTemplate};
pub use resolver::{
    ChannelTemplate, ChannelTemplateStore, InMemoryTemplateStore, TemplateResolution,
    TemplateResolveStatus, TemplateResolver, resolve_best,
};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::command::Command;
use crate::frame::Frame;

/// Produces the reply for one decoded command.
pub trait Handler: Send + Sync {
    fn call(&self, cmd: &Command) -> Frame;
}

impl<F> Handler for F
where
    F: Fn(&Command) -> Frame + Send + Sync,
{
    fn call(&self, cmd: &Command) -> Frame {
        self(cmd)
    }
}

/// Routes commands to handlers by their (case insensitive) name.
///
/// The table is built once, before the listener starts, and shared read-only
/// by every connection. Names without a route go to the fallback handler,
/// which by default acknowledges everything with `+OK`.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<HashMap<String, Arc<dyn Handler>>>,
    fallback: Arc<dyn Handler>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    pub fn dispatch(&self, cmd: &Command) -> Frame {
        let handler = cmd
            .name()
            .and_then(|name| self.routes.get(&name))
            .unwrap_or(&self.fallback);

        handler.call(cmd)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(&name.to_lowercase())
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.routes.keys().collect();
        names.sort();
        f.debug_struct("Dispatcher").field("routes", &names).finish()
    }
}

pub struct DispatcherBuilder {
    routes: HashMap<String, Arc<dyn Handler>>,
    fallback: Arc<dyn Handler>,
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            fallback: Arc::new(acknowledge),
        }
    }
}

impl DispatcherBuilder {
    /// Registers `handler` for `name`, replacing any earlier handler for it.
    pub fn route(mut self, name: &str, handler: impl Handler + 'static) -> Self {
        self.routes.insert(name.to_lowercase(), Arc::new(handler));
        self
    }

    pub fn fallback(mut self, handler: impl Handler + 'static) -> Self {
        self.fallback = Arc::new(handler);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            routes: Arc::new(self.routes),
            fallback: self.fallback,
        }
    }
}

/// Replies `+OK` regardless of the command.
pub fn acknowledge(_cmd: &Command) -> Frame {
    Frame::ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn cmd(args: &[&'static str]) -> Command {
        Command::new(args.iter().map(|a| Some(Bytes::from(*a))).collect())
    }

    #[test]
    fn default_dispatcher_acknowledges_everything() {
        let dispatcher = Dispatcher::default();

        assert_eq!(dispatcher.dispatch(&cmd(&["SET", "key", "value"])), Frame::ok());
        assert_eq!(dispatcher.dispatch(&cmd(&["PING"])), Frame::ok());
        assert_eq!(dispatcher.dispatch(&Command::default()), Frame::ok());
    }

    #[test]
    fn routes_are_case_insensitive() {
        let dispatcher = Dispatcher::builder()
            .route("PING", |_: &Command| Frame::Simple("PONG".to_string().into()))
            .build();

        assert!(dispatcher.contains("ping"));
        assert_eq!(
            dispatcher.dispatch(&cmd(&["pInG"])),
            Frame::Simple("PONG".to_string().into())
        );
        assert_eq!(dispatcher.dispatch(&cmd(&["GET", "k"])), Frame::ok());
    }

    #[test]
    fn handler_sees_all_arguments() {
        let dispatcher = Dispatcher::builder()
            .route("echo", |cmd: &Command| {
                cmd.args()
                    .get(1)
                    .cloned()
                    .flatten()
                    .map_or(Frame::Null, Frame::Bulk)
            })
            .build();

        assert_eq!(
            dispatcher.dispatch(&cmd(&["ECHO", "hello"])),
            Frame::bulk("hello")
        );
        assert_eq!(dispatcher.dispatch(&cmd(&["ECHO"])), Frame::Null);
    }

    #[test]
    fn custom_fallback() {
        let dispatcher = Dispatcher::builder()
            .fallback(|cmd: &Command| {
                Frame::error(format!("ERR unknown command '{}'", cmd.to_strings()[0]))
            })
            .build();

        assert_eq!(
            dispatcher.dispatch(&cmd(&["nope"])),
            Frame::error("ERR unknown command 'nope'")
        );
    }

    #[test]
    fn debug_lists_routes() {
        let dispatcher = Dispatcher::builder()
            .route("b", acknowledge)
            .route("a", acknowledge)
            .build();

        assert_eq!(format!("{:?}", dispatcher), r#"Dispatcher { routes: ["a", "b"] }"#);
    }
}

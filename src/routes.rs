//! Route definitions and the runtime route registry.
//!
//! Developer code builds a tree of [`Route`]s: pages containing child
//! pages and actions, with actions as leaves. The registry flattens the
//! tree into slug-path→handler maps (`/`-joined page slugs) and notifies
//! observers when the set changes at runtime so the host can re-announce
//! itself.
//!
//! Several historical config shapes (a flat action map, nested groups, an
//! explicit route tree) all normalize into one tree at ingestion; every
//! later code path sees only the normalized form.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::io::Io;
use crate::rpc::methods::{ActionAnnouncement, MenuItem, PageAnnouncement};
use crate::transaction::{ActionCtx, PageCtx};

/// What an action handler produces.
pub type HandlerResult = anyhow::Result<Value>;

/// Boxed action handler: `(io, ctx) -> future of result`.
pub type ActionHandlerFn =
    Arc<dyn Fn(Io, ActionCtx) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Boxed page handler: `ctx -> future of layout`.
pub type PageHandlerFn =
    Arc<dyn Fn(PageCtx) -> BoxFuture<'static, anyhow::Result<Layout>> + Send + Sync>;

/// A page layout field that may resolve asynchronously.
///
/// Pending fields trigger an additional layout render when they resolve.
pub enum LayoutField {
    /// Already known.
    Text(String),
    /// Resolves later; the session re-renders when it lands.
    Pending(BoxFuture<'static, String>),
}

impl LayoutField {
    /// Build a resolved field.
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    /// Build a pending field from a future.
    pub fn pending<F>(fut: F) -> Self
    where
        F: Future<Output = String> + Send + 'static,
    {
        Self::Pending(Box::pin(fut))
    }
}

impl std::fmt::Debug for LayoutField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(value) => f.debug_tuple("Text").field(value).finish(),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Layout returned by a page handler.
#[derive(Debug, Default)]
pub struct Layout {
    /// Page title.
    pub title: Option<LayoutField>,
    /// Page description.
    pub description: Option<LayoutField>,
    /// Menu entries.
    pub menu_items: Option<Vec<MenuItem>>,
    /// Arbitrary display children.
    pub children: Option<Value>,
}

impl Layout {
    /// Empty layout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a resolved title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(LayoutField::text(title));
        self
    }

    /// Set a title that resolves asynchronously.
    pub fn with_title_future<F>(mut self, fut: F) -> Self
    where
        F: Future<Output = String> + Send + 'static,
    {
        self.title = Some(LayoutField::pending(fut));
        self
    }

    /// Set a resolved description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(LayoutField::text(description));
        self
    }

    /// Set a description that resolves asynchronously.
    pub fn with_description_future<F>(mut self, fut: F) -> Self
    where
        F: Future<Output = String> + Send + 'static,
    {
        self.description = Some(LayoutField::pending(fut));
        self
    }

    /// Set the menu entries.
    pub fn with_menu_items(mut self, items: Vec<MenuItem>) -> Self {
        self.menu_items = Some(items);
        self
    }
}

/// An action definition: a slug plus its async handler and metadata.
#[derive(Clone)]
pub struct ActionRoute {
    /// Slug within its parent page.
    pub slug: String,
    /// The handler.
    pub handler: ActionHandlerFn,
    /// Display name override.
    pub name: Option<String>,
    /// Dashboard description.
    pub description: Option<String>,
    /// Hidden from listings.
    pub unlisted: bool,
}

impl std::fmt::Debug for ActionRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRoute")
            .field("slug", &self.slug)
            .field("name", &self.name)
            .field("unlisted", &self.unlisted)
            .finish_non_exhaustive()
    }
}

/// A page definition: an optional layout handler plus child routes.
#[derive(Clone)]
pub struct PageRoute {
    /// Slug within its parent page.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Layout handler, if the page renders its own layout.
    pub handler: Option<PageHandlerFn>,
    /// Child pages and actions.
    pub children: Vec<Route>,
    /// Hidden from listings.
    pub unlisted: bool,
}

impl std::fmt::Debug for PageRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageRoute")
            .field("slug", &self.slug)
            .field("name", &self.name)
            .field("has_handler", &self.handler.is_some())
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

/// One node in the route tree.
#[derive(Debug, Clone)]
pub enum Route {
    /// A leaf action.
    Action(ActionRoute),
    /// A page with children.
    Page(PageRoute),
}

impl Route {
    /// Build an action route from an async closure.
    pub fn action<F, Fut>(slug: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Io, ActionCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Action(ActionRoute {
            slug: slug.into(),
            handler: Arc::new(move |io, ctx| Box::pin(handler(io, ctx))),
            name: None,
            description: None,
            unlisted: false,
        })
    }

    /// Build a page with children and no layout handler.
    pub fn page(
        slug: impl Into<String>,
        name: impl Into<String>,
        children: Vec<Route>,
    ) -> Self {
        Self::Page(PageRoute {
            slug: slug.into(),
            name: name.into(),
            handler: None,
            children,
            unlisted: false,
        })
    }

    /// Build a page with a layout handler.
    pub fn page_with_handler<F, Fut>(
        slug: impl Into<String>,
        name: impl Into<String>,
        handler: F,
        children: Vec<Route>,
    ) -> Self
    where
        F: Fn(PageCtx) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Layout>> + Send + 'static,
    {
        Self::Page(PageRoute {
            slug: slug.into(),
            name: name.into(),
            handler: Some(Arc::new(move |ctx| Box::pin(handler(ctx)))),
            children,
            unlisted: false,
        })
    }

    /// Set the display name (actions) or rename (pages).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        match &mut self {
            Self::Action(action) => action.name = Some(name.into()),
            Self::Page(page) => page.name = name.into(),
        }
        self
    }

    /// Set the dashboard description (actions only; ignored for pages).
    pub fn described(mut self, description: impl Into<String>) -> Self {
        if let Self::Action(action) = &mut self {
            action.description = Some(description.into());
        }
        self
    }

    /// Hide from listings.
    pub fn unlisted(mut self) -> Self {
        match &mut self {
            Self::Action(action) => action.unlisted = true,
            Self::Page(page) => page.unlisted = true,
        }
        self
    }

    fn slug(&self) -> &str {
        match self {
            Self::Action(action) => &action.slug,
            Self::Page(page) => &page.slug,
        }
    }
}

/// Emitted to observers when the route set mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    /// The flattened route set changed; re-announce.
    Updated,
}

/// Opaque observer handle; detach with [`RouteRegistry::unobserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

#[derive(Default)]
struct Flattened {
    actions: HashMap<String, ActionRoute>,
    pages: HashMap<String, PageRoute>,
}

/// Flattens the route tree and tracks runtime mutations.
pub struct RouteRegistry {
    tree: RwLock<Vec<Route>>,
    flat: RwLock<Flattened>,
    observers: Mutex<HashMap<u64, mpsc::UnboundedSender<RouteChange>>>,
    next_token: AtomicU64,
}

impl std::fmt::Debug for RouteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flat = self.flat.read().expect("flat lock poisoned");
        f.debug_struct("RouteRegistry")
            .field("actions", &flat.actions.len())
            .field("pages", &flat.pages.len())
            .finish_non_exhaustive()
    }
}

impl RouteRegistry {
    /// Build a registry from a route tree.
    pub fn new(routes: Vec<Route>) -> Self {
        let registry = Self {
            tree: RwLock::new(Vec::new()),
            flat: RwLock::new(Flattened::default()),
            observers: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        };
        registry.install(routes);
        registry
    }

    /// Normalize a flat `slug → handler` map into a route tree.
    ///
    /// Convenience for the simplest config shape; equivalent to a tree of
    /// top-level actions.
    pub fn from_actions(actions: Vec<Route>) -> Self {
        Self::new(actions)
    }

    /// Look up an action by slug path.
    pub fn action(&self, slug_path: &str) -> Option<ActionRoute> {
        self.flat
            .read()
            .expect("flat lock poisoned")
            .actions
            .get(slug_path)
            .cloned()
    }

    /// Look up a page by slug path.
    pub fn page(&self, slug_path: &str) -> Option<PageRoute> {
        self.flat
            .read()
            .expect("flat lock poisoned")
            .pages
            .get(slug_path)
            .cloned()
    }

    /// Number of registered actions.
    pub fn action_count(&self) -> usize {
        self.flat.read().expect("flat lock poisoned").actions.len()
    }

    /// Flattened announcements for the initialization handshake.
    pub fn announcements(&self) -> (Vec<ActionAnnouncement>, Vec<PageAnnouncement>) {
        let flat = self.flat.read().expect("flat lock poisoned");

        let mut actions: Vec<ActionAnnouncement> = flat
            .actions
            .iter()
            .map(|(slug_path, action)| ActionAnnouncement {
                slug: slug_path.clone(),
                name: action.name.clone(),
                description: action.description.clone(),
                unlisted: action.unlisted,
            })
            .collect();
        actions.sort_by(|a, b| a.slug.cmp(&b.slug));

        let mut pages: Vec<PageAnnouncement> = flat
            .pages
            .iter()
            .map(|(slug_path, page)| PageAnnouncement {
                slug: slug_path.clone(),
                name: page.name.clone(),
                has_handler: page.handler.is_some(),
                unlisted: page.unlisted,
            })
            .collect();
        pages.sort_by(|a, b| a.slug.cmp(&b.slug));

        (actions, pages)
    }

    /// Replace the whole tree and notify observers.
    pub fn replace(&self, routes: Vec<Route>) {
        self.install(routes);
        self.notify();
    }

    /// Add a top-level route and notify observers.
    ///
    /// A route with the same top-level slug is replaced.
    pub fn add(&self, route: Route) {
        {
            let mut tree = self.tree.write().expect("tree lock poisoned");
            tree.retain(|existing| existing.slug() != route.slug());
            tree.push(route);
        }
        self.reflatten();
        self.notify();
    }

    /// Remove a top-level route by slug and notify observers.
    pub fn remove(&self, slug: &str) {
        let removed = {
            let mut tree = self.tree.write().expect("tree lock poisoned");
            let before = tree.len();
            tree.retain(|existing| existing.slug() != slug);
            tree.len() != before
        };
        if removed {
            self.reflatten();
            self.notify();
        }
    }

    /// Attach an observer; events arrive on the returned receiver.
    pub fn observe(&self) -> (ObserverToken, mpsc::UnboundedReceiver<RouteChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.observers
            .lock()
            .expect("observers lock poisoned")
            .insert(token, tx);
        (ObserverToken(token), rx)
    }

    /// Detach an observer.
    pub fn unobserve(&self, token: ObserverToken) {
        self.observers
            .lock()
            .expect("observers lock poisoned")
            .remove(&token.0);
    }

    fn install(&self, routes: Vec<Route>) {
        *self.tree.write().expect("tree lock poisoned") = routes;
        self.reflatten();
    }

    fn reflatten(&self) {
        let tree = self.tree.read().expect("tree lock poisoned");
        let mut flat = Flattened::default();
        for route in tree.iter() {
            flatten_into(route, "", &mut flat);
        }
        *self.flat.write().expect("flat lock poisoned") = flat;
    }

    fn notify(&self) {
        let mut observers = self.observers.lock().expect("observers lock poisoned");
        observers.retain(|_, tx| tx.send(RouteChange::Updated).is_ok());
    }
}

/// Recursively flatten one route under `prefix` into the maps.
///
/// Duplicate slug paths resolve last-write-wins with a warning.
fn flatten_into(route: &Route, prefix: &str, flat: &mut Flattened) {
    match route {
        Route::Action(action) => {
            let slug_path = join_slug(prefix, &action.slug);
            if flat.actions.insert(slug_path.clone(), action.clone()).is_some() {
                log::warn!("[Routes] Duplicate action slug {slug_path}, keeping the last one");
            }
        }
        Route::Page(page) => {
            let slug_path = join_slug(prefix, &page.slug);
            for child in &page.children {
                flatten_into(child, &slug_path, flat);
            }
            if flat.pages.insert(slug_path.clone(), page.clone()).is_some() {
                log::warn!("[Routes] Duplicate page slug {slug_path}, keeping the last one");
            }
        }
    }
}

fn join_slug(prefix: &str, slug: &str) -> String {
    if prefix.is_empty() {
        slug.to_string()
    } else {
        format!("{prefix}/{slug}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_action(slug: &str) -> Route {
        Route::action(slug, |_io, _ctx| async { Ok(json!(null)) })
    }

    fn sample_tree() -> Vec<Route> {
        vec![
            noop_action("hello"),
            Route::page(
                "billing",
                "Billing",
                vec![
                    noop_action("refund"),
                    Route::page("invoices", "Invoices", vec![noop_action("void")]),
                ],
            ),
        ]
    }

    #[test]
    fn test_flattening_joins_slugs_with_slashes() {
        let registry = RouteRegistry::new(sample_tree());

        assert!(registry.action("hello").is_some());
        assert!(registry.action("billing/refund").is_some());
        assert!(registry.action("billing/invoices/void").is_some());
        assert!(registry.page("billing").is_some());
        assert!(registry.page("billing/invoices").is_some());
        assert!(registry.action("billing").is_none());
        assert!(registry.action("missing").is_none());
    }

    #[test]
    fn test_duplicate_slug_last_write_wins() {
        let registry = RouteRegistry::new(vec![
            Route::action("dup", |_io, _ctx| async { Ok(json!("first")) }),
            Route::action("dup", |_io, _ctx| async { Ok(json!("second")) }),
        ]);
        assert_eq!(registry.action_count(), 1);
        assert!(registry.action("dup").is_some());
    }

    #[test]
    fn test_announcements_are_sorted_and_complete() {
        let registry = RouteRegistry::new(sample_tree());
        let (actions, pages) = registry.announcements();

        let slugs: Vec<&str> = actions.iter().map(|a| a.slug.as_str()).collect();
        assert_eq!(slugs, vec!["billing/invoices/void", "billing/refund", "hello"]);

        let page_slugs: Vec<&str> = pages.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(page_slugs, vec!["billing", "billing/invoices"]);
    }

    #[test]
    fn test_metadata_builders() {
        let route = noop_action("deploy")
            .named("Deploy to production")
            .described("Ships the current build")
            .unlisted();
        let registry = RouteRegistry::new(vec![route]);
        let (actions, _) = registry.announcements();
        assert_eq!(actions[0].name.as_deref(), Some("Deploy to production"));
        assert_eq!(actions[0].description.as_deref(), Some("Ships the current build"));
        assert!(actions[0].unlisted);
    }

    #[tokio::test]
    async fn test_observers_see_mutations() {
        let registry = RouteRegistry::new(sample_tree());
        let (token, mut rx) = registry.observe();

        registry.add(noop_action("new-action"));
        assert_eq!(rx.recv().await, Some(RouteChange::Updated));
        assert!(registry.action("new-action").is_some());

        registry.remove("new-action");
        assert_eq!(rx.recv().await, Some(RouteChange::Updated));
        assert!(registry.action("new-action").is_none());

        registry.unobserve(token);
        registry.add(noop_action("after-detach"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_remove_missing_slug_is_silent() {
        let registry = RouteRegistry::new(sample_tree());
        let (_token, mut rx) = registry.observe();
        registry.remove("does-not-exist");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_replace_swaps_the_tree() {
        let registry = RouteRegistry::new(sample_tree());
        registry.replace(vec![noop_action("only")]);
        assert_eq!(registry.action_count(), 1);
        assert!(registry.action("only").is_some());
        assert!(registry.action("hello").is_none());
    }
}

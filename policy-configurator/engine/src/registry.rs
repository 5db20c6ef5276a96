use crate::RegistryError;
use policy_configurator_core::{PodLabel, PolicyRenderer};
use std::sync::Arc;

pub type SharedRenderer = Arc<dyn PolicyRenderer>;

/// Maps pod labels to the renderers of the network stacks those pods are attached to.
///
/// Pods carrying none of the registered labels are rendered by the default renderer.
#[derive(Clone, Default)]
pub struct Registry {
    /// Label bindings in registration order.
    labeled: Vec<(PodLabel, SharedRenderer)>,
    default: Option<SharedRenderer>,
}

// === impl Registry ===

impl Registry {
    /// Binds a renderer to pods carrying `label`.
    ///
    /// Registering the same renderer for a label again has no effect.
    pub fn register(
        &mut self,
        label: PodLabel,
        renderer: SharedRenderer,
    ) -> Result<(), RegistryError> {
        if let Some((_, existing)) = self.labeled.iter().find(|(l, _)| *l == label) {
            if same_renderer(existing, &renderer) {
                return Ok(());
            }
            return Err(RegistryError::AlreadyRegistered { label });
        }

        tracing::debug!(%label, renderer = %renderer.name(), "Registered renderer");
        self.labeled.push((label, renderer));
        Ok(())
    }

    /// Sets the renderer for pods that are not matched by any label.
    ///
    /// The default renderer may be set only once.
    pub fn register_default(&mut self, renderer: SharedRenderer) -> Result<(), RegistryError> {
        if self.default.is_some() {
            return Err(RegistryError::DefaultAlreadyRegistered);
        }
        tracing::debug!(renderer = %renderer.name(), "Registered default renderer");
        self.default = Some(renderer);
        Ok(())
    }

    /// Finds the renderer for a pod with the given labels.
    ///
    /// Labels are checked in registration order; the first one carried by the pod wins.
    pub fn resolve(&self, labels: &[PodLabel]) -> Result<&SharedRenderer, RegistryError> {
        self.labeled
            .iter()
            .find(|(label, _)| labels.contains(label))
            .map(|(_, renderer)| renderer)
            .or(self.default.as_ref())
            .ok_or(RegistryError::NoDefaultRenderer)
    }

    /// Returns every distinct registered renderer, in registration order.
    pub fn renderers(&self) -> Vec<SharedRenderer> {
        let mut renderers = Vec::<SharedRenderer>::new();
        for renderer in self
            .labeled
            .iter()
            .map(|(_, r)| r)
            .chain(self.default.as_ref())
        {
            if !renderers.iter().any(|r| same_renderer(r, renderer)) {
                renderers.push(renderer.clone());
            }
        }
        renderers
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field(
                "labeled",
                &self
                    .labeled
                    .iter()
                    .map(|(label, r)| (label.to_string(), r.name().to_string()))
                    .collect::<Vec<_>>(),
            )
            .field("default", &self.default.as_ref().map(|r| r.name()))
            .finish()
    }
}

/// Renderers are compared by identity.
pub(crate) fn same_renderer(a: &SharedRenderer, b: &SharedRenderer) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRenderer;

    fn label(key: &str, value: &str) -> PodLabel {
        PodLabel::new(key, value)
    }

    #[test]
    fn register_is_idempotent() {
        let vpp: SharedRenderer = Arc::new(MemoryRenderer::new("vpp"));
        let other: SharedRenderer = Arc::new(MemoryRenderer::new("vpp"));

        let mut registry = Registry::default();
        registry
            .register(label("stack", "vpp"), vpp.clone())
            .unwrap();
        registry
            .register(label("stack", "vpp"), vpp.clone())
            .unwrap();
        assert_eq!(
            registry.register(label("stack", "vpp"), other.clone()),
            Err(RegistryError::AlreadyRegistered {
                label: label("stack", "vpp")
            })
        );

        // The same renderer may serve multiple labels.
        registry
            .register(label("stack", "dpdk"), vpp.clone())
            .unwrap();
        assert_eq!(registry.renderers().len(), 1);
    }

    #[test]
    fn register_default_once() {
        let kernel: SharedRenderer = Arc::new(MemoryRenderer::new("kernel"));
        let other: SharedRenderer = Arc::new(MemoryRenderer::new("other"));

        let mut registry = Registry::default();
        registry.register_default(kernel.clone()).unwrap();
        assert_eq!(
            registry.register_default(kernel.clone()),
            Err(RegistryError::DefaultAlreadyRegistered)
        );
        assert_eq!(
            registry.register_default(other),
            Err(RegistryError::DefaultAlreadyRegistered)
        );

        // The first default is kept.
        assert!(same_renderer(registry.resolve(&[]).unwrap(), &kernel));
    }

    #[test]
    fn resolve() {
        let kernel: SharedRenderer = Arc::new(MemoryRenderer::new("kernel"));
        let vpp: SharedRenderer = Arc::new(MemoryRenderer::new("vpp"));
        let dpdk: SharedRenderer = Arc::new(MemoryRenderer::new("dpdk"));

        let mut registry = Registry::default();
        assert_eq!(
            registry.resolve(&[]).err(),
            Some(RegistryError::NoDefaultRenderer)
        );

        registry.register(label("stack", "vpp"), vpp.clone()).unwrap();
        registry
            .register(label("accel", "dpdk"), dpdk.clone())
            .unwrap();
        assert_eq!(
            registry.resolve(&[label("app", "web")]).err(),
            Some(RegistryError::NoDefaultRenderer)
        );

        registry.register_default(kernel.clone()).unwrap();
        assert!(same_renderer(
            registry.resolve(&[label("app", "web")]).unwrap(),
            &kernel
        ));
        assert!(same_renderer(
            registry
                .resolve(&[label("app", "web"), label("accel", "dpdk")])
                .unwrap(),
            &dpdk
        ));

        // The first registered label wins, regardless of the order of the pod's labels.
        assert!(same_renderer(
            registry
                .resolve(&[label("accel", "dpdk"), label("stack", "vpp")])
                .unwrap(),
            &vpp
        ));

        let names = registry
            .renderers()
            .iter()
            .map(|r| r.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["vpp", "dpdk", "kernel"]);
    }
}

//! Model definitions.
//!
//! A model is anything that can produce a [`ModelGraph`]; compiling that
//! graph for a backend yields a trainable [`CompiledModel`].

mod blocks;
mod dense_unet;

pub use blocks::{DenseBlock, conv_factory};
pub use dense_unet::{DenseUNet, DenseUNetConfig};

use burn::tensor::backend::Backend;

use crate::errors::ModelError;
use crate::graph::{CompiledModel, ModelGraph};

/// A factory for one model architecture.
pub trait ModelFactory {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Builds the weightless graph of the model.
    ///
    /// Architectures are expected to override this; the default reports
    /// that the model was never defined.
    fn model_graph(&self) -> Result<ModelGraph, ModelError> {
        Err(ModelError::NotImplemented {
            model: self.name().to_string(),
        })
    }

    /// Builds the graph and compiles it with freshly initialized weights.
    fn compile<B: Backend>(&self, device: &B::Device) -> Result<CompiledModel<B>, ModelError>
    where
        Self: Sized,
    {
        self.model_graph()?.compile(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    struct Undefined;

    impl ModelFactory for Undefined {
        fn name(&self) -> &str {
            "undefined"
        }
    }

    #[test]
    fn test_missing_model_graph_is_reported() {
        let err = Undefined.model_graph().unwrap_err();
        assert!(matches!(err, ModelError::NotImplemented { ref model } if model == "undefined"));
        assert_eq!(
            err.to_string(),
            "Model `undefined` does not implement model_graph()"
        );
    }

    #[test]
    fn test_compile_propagates_missing_model_graph() {
        let device = <NdArray as Backend>::Device::default();
        let result = Undefined.compile::<NdArray>(&device);
        assert!(matches!(result, Err(ModelError::NotImplemented { .. })));
    }

    #[test]
    fn test_factory_is_object_safe() {
        let factories: Vec<Box<dyn ModelFactory>> = vec![Box::new(Undefined), Box::new(DenseUNet::new())];
        let names: Vec<&str> = factories.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["undefined", "dense_unet"]);
        assert!(factories[1].model_graph().is_ok());
    }
}

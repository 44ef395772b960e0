use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

/// Stack of linear layers with ReLU between them and a raw linear output.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    layers: Vec<Linear<B>>,
}

impl<B: Backend> Mlp<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let last = self.layers.len() - 1;

        self.layers
            .iter()
            .enumerate()
            .fold(x, |x, (i, layer)| {
                let x = layer.forward(x);
                if i < last {
                    activation::relu(x)
                } else {
                    x
                }
            })
    }
}

#[derive(Config, Debug)]
pub struct MlpConfig {
    d_input: usize,
    d_output: usize,

    #[config(default = "vec![]")]
    d_hidden: Vec<usize>,
}

impl MlpConfig {
    pub fn init<B: Backend>(&self) -> Mlp<B> {
        let dims: Vec<usize> = std::iter::once(self.d_input)
            .chain(self.d_hidden.iter().copied())
            .chain(std::iter::once(self.d_output))
            .collect();

        let layers = dims
            .windows(2)
            .map(|pair| LinearConfig::new(pair[0], pair[1]).init())
            .collect();

        Mlp { layers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn builds_one_layer_per_transition() {
        let mlp: Mlp<TestBackend> = MlpConfig::new(4, 3)
            .with_d_hidden(vec![8, 16, 8])
            .init();

        assert_eq!(mlp.layers.len(), 4);

        let out = mlp.forward(Tensor::<TestBackend, 3>::ones([2, 1, 4]));
        assert_eq!(out.dims(), [2, 1, 3]);
    }
}

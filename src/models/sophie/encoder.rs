use burn::config::Config;
use burn::module::Module;
use burn::nn::{Linear, LinearConfig, Lstm, LstmConfig};
use burn::tensor::activation;
use burn::tensor::{backend::Backend, Tensor};

use crate::error::SophieError;
use crate::utils::{descending_order, index_tensor, invert_permutation};

/// Encodes ragged coordinate sequences into one hidden vector each.
#[derive(Module, Debug)]
pub struct SequenceEncoder<B: Backend> {
    d_input: usize,
    d_embedding: usize,
    d_hidden: usize,
    embedding: Linear<B>,
    lstms: Vec<Lstm<B>>,
}

impl<B: Backend> SequenceEncoder<B> {
    /// `x` is `[M, S, I]`, `lengths` the unpadded length of each of the M
    /// rows. Returns the hidden state at every row's own last step, `[M, H]`,
    /// in input order.
    pub fn forward(&self, x: Tensor<B, 3>, lengths: &[usize]) -> crate::error::Result<Tensor<B, 2>> {
        let [n_seq, seq_len, d_input] = x.dims();
        if d_input != self.d_input {
            return Err(SophieError::dims(
                "encoder input",
                format!("[M, S, {}]", self.d_input),
                &x.dims(),
            ));
        }
        if lengths.len() != n_seq || lengths.iter().any(|&l| l == 0 || l > seq_len) {
            return Err(SophieError::dims(
                "encoder lengths",
                format!("{n_seq} lengths within 1..={seq_len}"),
                lengths,
            ));
        }

        let order = descending_order(lengths);
        let sorted_lengths: Vec<usize> = order.iter().map(|&row| lengths[row]).collect();

        let x = x.select(0, index_tensor(&order));
        let x = activation::relu(self.embedding.forward(x));

        let hidden = self.packed(x, &sorted_lengths);

        Ok(hidden.select(0, index_tensor(&invert_permutation(&order))))
    }

    /// Runs the recurrence over a batch sorted by descending length. At step
    /// `t` only the leading rows still longer than `t` advance, the others
    /// keep the state of their final step.
    fn packed(&self, x: Tensor<B, 3>, sorted_lengths: &[usize]) -> Tensor<B, 2> {
        let [n_seq, _, _] = x.dims();
        let max_len = sorted_lengths.first().copied().unwrap_or(0);

        let mut cells: Vec<Tensor<B, 2>> = self
            .lstms
            .iter()
            .map(|_| Tensor::zeros([n_seq, self.d_hidden]))
            .collect();
        let mut hiddens = cells.clone();

        for step in 0..max_len {
            let active = sorted_lengths.iter().take_while(|&&l| l > step).count();
            let rows = [0..active, 0..self.d_hidden];

            let mut input = x
                .clone()
                .slice([0..active, step..step + 1, 0..self.d_embedding]);

            for (layer, lstm) in self.lstms.iter().enumerate() {
                let state = (
                    cells[layer].clone().slice(rows.clone()),
                    hiddens[layer].clone().slice(rows.clone()),
                );
                let (cell, hidden) = lstm.forward(input, Some(state));

                let cell: Tensor<B, 2> = cell.squeeze(1);
                cells[layer] = cells[layer].clone().slice_assign(rows.clone(), cell);
                hiddens[layer] = hiddens[layer]
                    .clone()
                    .slice_assign(rows.clone(), hidden.clone().squeeze(1));

                input = hidden;
            }
        }

        let last = hiddens.len() - 1;
        hiddens.swap_remove(last)
    }
}

#[derive(Config, Debug)]
pub struct SequenceEncoderConfig {
    #[config(default = 2)]
    d_input: usize,

    #[config(default = 16)]
    d_embedding: usize,

    #[config(default = 32)]
    d_hidden: usize,

    #[config(default = 1)]
    num_layers: usize,
}

impl SequenceEncoderConfig {
    pub fn init<B: Backend>(&self) -> crate::error::Result<SequenceEncoder<B>> {
        if self.num_layers == 0 {
            return Err(SophieError::InvalidConfig(
                "encoder needs at least one recurrent layer".to_string(),
            ));
        }

        let lstms = (0..self.num_layers)
            .map(|layer| {
                let d_input = if layer == 0 { self.d_embedding } else { self.d_hidden };
                LstmConfig::new(d_input, self.d_hidden, true).init()
            })
            .collect();

        Ok(SequenceEncoder {
            d_input: self.d_input,
            d_embedding: self.d_embedding,
            d_hidden: self.d_hidden,
            embedding: LinearConfig::new(self.d_input, self.d_embedding).init(),
            lstms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::sophie::social::PADDING;
    use crate::utils::{float_tensor, host_values};
    use burn::backend::NdArray;
    use proptest::prelude::*;

    type TestBackend = NdArray<f32>;

    fn sequences(lengths: &[usize], seq_len: usize) -> Vec<f32> {
        lengths
            .iter()
            .enumerate()
            .flat_map(|(row, &len)| {
                (0..seq_len).flat_map(move |t| {
                    if t < len {
                        vec![0.3 * t as f32 + row as f32, 0.1 * row as f32 - 0.2 * t as f32]
                    } else {
                        vec![PADDING, PADDING]
                    }
                })
            })
            .collect()
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{x} != {y}");
        }
    }

    #[test]
    fn output_has_one_hidden_vector_per_sequence() {
        let encoder: SequenceEncoder<TestBackend> = SequenceEncoderConfig::new()
            .with_d_hidden(8)
            .init()
            .unwrap();
        let lengths = [3, 5, 1];
        let x = float_tensor::<TestBackend, 3>(sequences(&lengths, 5), [3, 5, 2]);

        let hidden = encoder.forward(x, &lengths).unwrap();
        assert_eq!(hidden.dims(), [3, 8]);
    }

    /// Sequence length, per-row lengths and a permutation of the rows.
    fn ragged_batch() -> impl Strategy<Value = (usize, Vec<usize>, Vec<usize>)> {
        (1usize..6, 1usize..6).prop_flat_map(|(n_seq, seq_len)| {
            (
                Just(seq_len),
                prop::collection::vec(1..=seq_len, n_seq),
                Just((0..n_seq).collect::<Vec<usize>>()).prop_shuffle(),
            )
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn reordering_the_batch_reorders_the_encodings(
            (seq_len, lengths, permutation) in ragged_batch()
        ) {
            let encoder: SequenceEncoder<TestBackend> = SequenceEncoderConfig::new()
                .with_d_hidden(6)
                .with_num_layers(2)
                .init()
                .unwrap();
            let n_seq = lengths.len();
            let row_size = seq_len * 2;

            let values = sequences(&lengths, seq_len);
            let hidden = host_values(
                encoder
                    .forward(float_tensor(values.clone(), [n_seq, seq_len, 2]), &lengths)
                    .unwrap(),
            );

            let permuted_values: Vec<f32> = permutation
                .iter()
                .flat_map(|&row| values[row * row_size..(row + 1) * row_size].to_vec())
                .collect();
            let permuted_lengths: Vec<usize> = permutation.iter().map(|&row| lengths[row]).collect();
            let permuted_hidden = host_values(
                encoder
                    .forward(float_tensor(permuted_values, [n_seq, seq_len, 2]), &permuted_lengths)
                    .unwrap(),
            );

            for (position, &row) in permutation.iter().enumerate() {
                let moved = &permuted_hidden[position * 6..(position + 1) * 6];
                let original = &hidden[row * 6..(row + 1) * 6];
                prop_assert!(moved.iter().zip(original).all(|(a, b)| (a - b).abs() < 1e-5));
            }
        }
    }

    #[test]
    fn padding_after_the_true_length_is_ignored() {
        let encoder: SequenceEncoder<TestBackend> = SequenceEncoderConfig::new()
            .with_d_hidden(4)
            .init()
            .unwrap();

        let padded = encoder
            .forward(float_tensor(sequences(&[3, 6], 6), [2, 6, 2]), &[3, 6])
            .unwrap();
        let trimmed = encoder
            .forward(float_tensor(sequences(&[3], 3), [1, 3, 2]), &[3])
            .unwrap();

        assert_close(&host_values(padded)[0..4], &host_values(trimmed));
    }

    #[test]
    fn rejects_wrong_coordinate_width() {
        let encoder: SequenceEncoder<TestBackend> = SequenceEncoderConfig::new().init().unwrap();
        let x = Tensor::<TestBackend, 3>::zeros([2, 4, 3]);

        assert!(matches!(
            encoder.forward(x, &[4, 4]),
            Err(SophieError::DimensionMismatch { tensor: "encoder input", .. })
        ));
    }

    #[test]
    fn rejects_zero_lengths() {
        let encoder: SequenceEncoder<TestBackend> = SequenceEncoderConfig::new().init().unwrap();
        let x = Tensor::<TestBackend, 3>::zeros([2, 4, 2]);

        assert!(encoder.forward(x, &[0, 4]).is_err());
    }

    #[test]
    fn rejects_zero_layers() {
        let encoder = SequenceEncoderConfig::new()
            .with_num_layers(0)
            .init::<TestBackend>();

        assert!(matches!(encoder, Err(SophieError::InvalidConfig(_))));
    }
}

//! Persistence of a whole fit: an 8-byte ASCII version prefix followed by
//! the control, model, data, and state blocks, all scalars little-endian
//! and trees as their newline-free state strings. A failed save unlinks
//! the partial file and reports false rather than erroring.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use ndarray::{Array1, Array2};

use crate::config::{Control, Data, EndNodeModel, Model, ResidualVariancePriorOptions, TreePriorOptions};
use crate::data::VariableType;
use crate::error::BartError;
use crate::fit::{BartFit, SamplerState};

const VERSION_STRING: &[u8; 8] = b"00.08.00";

impl BartFit {
    /// Serializes the fit. Returns Ok(false), after unlinking any partial
    /// output, when the file cannot be opened or written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<bool, BartError> {
        let path = path.as_ref();
        let file = match File::create(path) {
            Ok(file) => file,
            Err(error) => {
                eprintln!("unable to open file: {error}");
                return Ok(false);
            }
        };

        let mut writer = BufWriter::new(file);
        let outcome = write_fit(self, &mut writer).and_then(|()| writer.flush());
        match outcome {
            Ok(()) => Ok(true),
            Err(error) => {
                eprintln!("unable to write file: {error}");
                drop(writer);
                let _ = fs::remove_file(path);
                Ok(false)
            }
        }
    }

    /// Rebuilds a fit saved with `save_to_file`. The restored fit resumes
    /// the exact generator stream of the saved one.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<BartFit, BartError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut version = [0u8; 8];
        reader.read_exact(&mut version)?;
        if &version != VERSION_STRING {
            return Err(BartError::Format(format!(
                "unrecognized version prefix {:?}",
                String::from_utf8_lossy(&version)
            )));
        }

        let control = read_control(&mut reader)?;
        let model = read_model(&mut reader)?;
        let data = read_data(&mut reader)?;
        let state = read_state(&mut reader)?;

        let mut fit = BartFit::new(control, model, data)?;
        fit.restore_state(&state)?;
        Ok(fit)
    }
}

fn write_fit<W: Write>(fit: &BartFit, writer: &mut W) -> io::Result<()> {
    writer.write_all(VERSION_STRING)?;
    write_control(&fit.control, writer)?;
    write_model(&fit.model, writer)?;
    write_data(fit, writer)?;
    write_state(&fit.create_state(), writer)
}

fn write_control<W: Write>(control: &Control, writer: &mut W) -> io::Result<()> {
    write_bool(writer, control.response_is_binary)?;
    write_bool(writer, control.verbose)?;
    write_bool(writer, control.keep_training_fits)?;
    write_bool(writer, control.use_quantiles)?;
    write_bool(writer, control.match_bayes_tree)?;
    write_u64(writer, control.num_samples as u64)?;
    write_u64(writer, control.num_burn_in as u64)?;
    write_u64(writer, control.num_trees as u64)?;
    write_u64(writer, control.num_threads as u64)?;
    write_u64(writer, control.tree_thinning_rate as u64)?;
    write_u64(writer, control.print_every as u64)?;
    write_u64(writer, control.print_cutoffs as u64)?;
    write_u64(writer, control.rng_seed)
}

fn read_control<R: Read>(reader: &mut R) -> Result<Control, BartError> {
    Ok(Control {
        response_is_binary: read_bool(reader)?,
        verbose: read_bool(reader)?,
        keep_training_fits: read_bool(reader)?,
        use_quantiles: read_bool(reader)?,
        match_bayes_tree: read_bool(reader)?,
        num_samples: read_u64(reader)? as usize,
        num_burn_in: read_u64(reader)? as usize,
        num_trees: read_u64(reader)? as usize,
        num_threads: read_u64(reader)? as usize,
        tree_thinning_rate: read_u64(reader)? as usize,
        print_every: read_u64(reader)? as usize,
        print_cutoffs: read_u64(reader)? as usize,
        rng_seed: read_u64(reader)?,
        callback: None,
    })
}

fn write_model<W: Write>(model: &Model, writer: &mut W) -> io::Result<()> {
    write_f64(writer, model.birth_or_death_probability)?;
    write_f64(writer, model.swap_probability)?;
    write_f64(writer, model.change_probability)?;
    write_f64(writer, model.birth_probability)?;
    write_f64(writer, model.tree_prior.base)?;
    write_f64(writer, model.tree_prior.power)?;
    match &model.end_node_prior {
        EndNodeModel::MeanNormal { k } => {
            write_u8(writer, 0)?;
            write_f64(writer, *k)?;
        }
        EndNodeModel::LinRegNormal { precisions } => {
            write_u8(writer, 1)?;
            write_f64_slice(writer, precisions)?;
        }
    }
    write_f64(writer, model.residual_variance_prior.df)?;
    write_f64(writer, model.residual_variance_prior.quantile)
}

fn read_model<R: Read>(reader: &mut R) -> Result<Model, BartError> {
    let birth_or_death_probability = read_f64(reader)?;
    let swap_probability = read_f64(reader)?;
    let change_probability = read_f64(reader)?;
    let birth_probability = read_f64(reader)?;
    let base = read_f64(reader)?;
    let power = read_f64(reader)?;
    let end_node_prior = match read_u8(reader)? {
        0 => EndNodeModel::MeanNormal { k: read_f64(reader)? },
        1 => EndNodeModel::LinRegNormal {
            precisions: read_f64_vec(reader)?,
        },
        tag => {
            return Err(BartError::Format(format!(
                "unknown end-node model tag {tag}"
            )))
        }
    };
    Ok(Model {
        birth_or_death_probability,
        swap_probability,
        change_probability,
        birth_probability,
        tree_prior: TreePriorOptions { base, power },
        end_node_prior,
        residual_variance_prior: ResidualVariancePriorOptions {
            df: read_f64(reader)?,
            quantile: read_f64(reader)?,
        },
    })
}

fn write_data<W: Write>(fit: &BartFit, writer: &mut W) -> io::Result<()> {
    let data = &fit.data;
    let num_observations = data.num_observations();
    let num_predictors = data.num_predictors();

    write_u64(writer, num_observations as u64)?;
    write_u64(writer, num_predictors as u64)?;
    for &value in data.y.iter() {
        write_f64(writer, value)?;
    }
    for i in 0..num_observations {
        for j in 0..num_predictors {
            write_f64(writer, data.x[[i, j]])?;
        }
    }
    for &variable_type in &data.variable_types {
        write_u8(writer, matches!(variable_type, VariableType::Categorical) as u8)?;
    }
    for &max in &data.max_num_cuts {
        write_u64(writer, u64::from(max))?;
    }
    write_f64(writer, data.sigma_estimate)?;

    write_optional_slice(writer, data.weights.as_ref().map(|w| w.as_slice().unwrap()))?;
    write_optional_slice(writer, data.offset.as_ref().map(|o| o.as_slice().unwrap()))?;

    match &data.x_test {
        None => write_u64(writer, 0)?,
        Some(x_test) => {
            write_u64(writer, x_test.nrows() as u64)?;
            for i in 0..x_test.nrows() {
                for j in 0..num_predictors {
                    write_f64(writer, x_test[[i, j]])?;
                }
            }
        }
    }
    write_optional_slice(
        writer,
        data.test_offset.as_ref().map(|o| o.as_slice().unwrap()),
    )
}

fn read_data<R: Read>(reader: &mut R) -> Result<Data, BartError> {
    let num_observations = read_u64(reader)? as usize;
    let num_predictors = read_u64(reader)? as usize;

    let mut y = vec![0.0; num_observations];
    read_f64_into(reader, &mut y)?;
    let mut x_flat = vec![0.0; num_observations * num_predictors];
    read_f64_into(reader, &mut x_flat)?;
    let x = Array2::from_shape_vec((num_observations, num_predictors), x_flat)
        .map_err(|error| BartError::Format(error.to_string()))?;

    let mut variable_types = Vec::with_capacity(num_predictors);
    for _ in 0..num_predictors {
        variable_types.push(if read_u8(reader)? != 0 {
            VariableType::Categorical
        } else {
            VariableType::Ordinal
        });
    }
    let mut max_num_cuts = Vec::with_capacity(num_predictors);
    for _ in 0..num_predictors {
        max_num_cuts.push(read_u64(reader)? as u32);
    }
    let sigma_estimate = read_f64(reader)?;

    let weights = read_optional_vec(reader)?.map(Array1::from);
    let offset = read_optional_vec(reader)?.map(Array1::from);

    let num_test_observations = read_u64(reader)? as usize;
    let x_test = if num_test_observations == 0 {
        None
    } else {
        let mut flat = vec![0.0; num_test_observations * num_predictors];
        read_f64_into(reader, &mut flat)?;
        Some(
            Array2::from_shape_vec((num_test_observations, num_predictors), flat)
                .map_err(|error| BartError::Format(error.to_string()))?,
        )
    };
    let test_offset = read_optional_vec(reader)?.map(Array1::from);

    Ok(Data {
        y: Array1::from(y),
        x,
        variable_types,
        x_test,
        weights,
        offset,
        test_offset,
        sigma_estimate,
        max_num_cuts,
    })
}

fn write_state<W: Write>(state: &SamplerState, writer: &mut W) -> io::Result<()> {
    write_u64(writer, state.trees.len() as u64)?;
    for tree in &state.trees {
        write_string(writer, tree)?;
    }
    write_f64_slice(writer, &state.tree_fits)?;
    write_f64_slice(writer, &state.total_fits)?;
    write_f64_slice(writer, &state.total_test_fits)?;
    write_f64(writer, state.sigma)?;
    write_f64(writer, state.residual_variance_scale)?;
    writer.write_all(&state.rng_seed)?;
    write_u64(writer, state.rng_word_pos as u64)?;
    write_u64(writer, (state.rng_word_pos >> 64) as u64)
}

fn read_state<R: Read>(reader: &mut R) -> Result<SamplerState, BartError> {
    let num_trees = read_u64(reader)? as usize;
    let mut trees = Vec::with_capacity(num_trees);
    for _ in 0..num_trees {
        trees.push(read_string(reader)?);
    }
    let tree_fits = read_f64_vec(reader)?;
    let total_fits = read_f64_vec(reader)?;
    let total_test_fits = read_f64_vec(reader)?;
    let sigma = read_f64(reader)?;
    let residual_variance_scale = read_f64(reader)?;
    let mut rng_seed = [0u8; 32];
    reader.read_exact(&mut rng_seed)?;
    let low = read_u64(reader)?;
    let high = read_u64(reader)?;

    Ok(SamplerState {
        trees,
        tree_fits,
        total_fits,
        total_test_fits,
        sigma,
        residual_variance_scale,
        rng_seed,
        rng_word_pos: u128::from(low) | (u128::from(high) << 64),
    })
}

fn write_u8<W: Write>(writer: &mut W, value: u8) -> io::Result<()> {
    writer.write_all(&[value])
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8, BartError> {
    let mut buffer = [0u8; 1];
    reader.read_exact(&mut buffer)?;
    Ok(buffer[0])
}

fn write_bool<W: Write>(writer: &mut W, value: bool) -> io::Result<()> {
    write_u8(writer, value as u8)
}

fn read_bool<R: Read>(reader: &mut R) -> Result<bool, BartError> {
    Ok(read_u8(reader)? != 0)
}

fn write_u64<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, BartError> {
    let mut buffer = [0u8; 8];
    reader.read_exact(&mut buffer)?;
    Ok(u64::from_le_bytes(buffer))
}

fn write_f64<W: Write>(writer: &mut W, value: f64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn read_f64<R: Read>(reader: &mut R) -> Result<f64, BartError> {
    let mut buffer = [0u8; 8];
    reader.read_exact(&mut buffer)?;
    Ok(f64::from_le_bytes(buffer))
}

fn write_f64_slice<W: Write>(writer: &mut W, values: &[f64]) -> io::Result<()> {
    write_u64(writer, values.len() as u64)?;
    for &value in values {
        write_f64(writer, value)?;
    }
    Ok(())
}

fn read_f64_vec<R: Read>(reader: &mut R) -> Result<Vec<f64>, BartError> {
    let len = read_u64(reader)? as usize;
    let mut values = vec![0.0; len];
    read_f64_into(reader, &mut values)?;
    Ok(values)
}

fn read_f64_into<R: Read>(reader: &mut R, values: &mut [f64]) -> Result<(), BartError> {
    for value in values.iter_mut() {
        *value = read_f64(reader)?;
    }
    Ok(())
}

fn write_optional_slice<W: Write>(writer: &mut W, values: Option<&[f64]>) -> io::Result<()> {
    match values {
        None => write_bool(writer, false),
        Some(values) => {
            write_bool(writer, true)?;
            write_f64_slice(writer, values)
        }
    }
}

fn read_optional_vec<R: Read>(reader: &mut R) -> Result<Option<Vec<f64>>, BartError> {
    if read_bool(reader)? {
        Ok(Some(read_f64_vec(reader)?))
    } else {
        Ok(None)
    }
}

fn write_string<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    write_u64(writer, value.len() as u64)?;
    writer.write_all(value.as_bytes())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, BartError> {
    let len = read_u64(reader)? as usize;
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer)?;
    String::from_utf8(buffer).map_err(|error| BartError::Format(error.to_string()))
}

use crate::error::{CdlError, Result};
use crate::models::InteractionIndex;
use nalgebra::DMatrix;
use ndarray::Array2;
use std::collections::HashSet;

pub fn validate_content_matrix(content: &Array2<f32>, input_dim: usize) -> Result<()> {
    if content.ncols() != input_dim {
        return Err(CdlError::shape("content matrix width", input_dim, content.ncols()));
    }

    if content.nrows() == 0 {
        return Err(CdlError::shape("content matrix rows", ">= 1", 0));
    }

    if let Some(pos) = content.iter().position(|x| !x.is_finite()) {
        let (row, col) = (pos / content.ncols(), pos % content.ncols());
        return Err(CdlError::InvalidContent(format!(
            "non-finite value at row {}, column {}",
            row, col
        )));
    }

    Ok(())
}

/// Checks id bounds, duplicates, and that both directions agree.
pub fn validate_interaction_index(index: &InteractionIndex) -> Result<()> {
    let num_users = index.num_users();
    let num_items = index.num_items();

    let mut forward = HashSet::new();
    for (user, items) in index.users().iter().enumerate() {
        for &item in items {
            if item >= num_items {
                return Err(CdlError::InvalidInteractions(format!(
                    "user {} references item {} (only {} items)",
                    user, item, num_items
                )));
            }
            if !forward.insert((user, item)) {
                return Err(CdlError::InvalidInteractions(format!(
                    "duplicate interaction ({}, {})",
                    user, item
                )));
            }
        }
    }

    let mut backward = 0usize;
    for (item, users) in index.items().iter().enumerate() {
        for &user in users {
            if user >= num_users {
                return Err(CdlError::InvalidInteractions(format!(
                    "item {} references user {} (only {} users)",
                    item, user, num_users
                )));
            }
            if !forward.contains(&(user, item)) {
                return Err(CdlError::InvalidInteractions(format!(
                    "item {} lists user {} but user {} does not list item {}",
                    item, user, user, item
                )));
            }
            backward += 1;
        }
    }

    if backward != forward.len() {
        return Err(CdlError::InvalidInteractions(format!(
            "user lists hold {} interactions but item lists hold {}",
            forward.len(),
            backward
        )));
    }

    Ok(())
}

pub fn validate_factor_matrix(what: &str, matrix: &DMatrix<f64>, rows: usize, cols: usize) -> Result<()> {
    if matrix.shape() != (rows, cols) {
        return Err(CdlError::shape(what, (rows, cols), matrix.shape()));
    }
    Ok(())
}

pub fn validate_rows(what: &str, rows: &[Vec<f64>], expected_rows: usize, expected_cols: usize) -> Result<()> {
    if rows.len() != expected_rows {
        return Err(CdlError::shape(
            format!("{} rows", what),
            expected_rows,
            rows.len(),
        ));
    }
    if let Some(row) = rows.iter().find(|r| r.len() != expected_cols) {
        return Err(CdlError::shape(
            format!("{} columns", what),
            expected_cols,
            row.len(),
        ));
    }
    Ok(())
}

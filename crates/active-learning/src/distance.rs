use ndarray::ArrayView1;

#[must_use]
pub fn squared_euclidean(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
	a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[must_use]
pub fn euclidean(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
	squared_euclidean(a, b).sqrt()
}
